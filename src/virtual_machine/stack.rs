//! Operand stack, call frames, and execution contexts.

use crate::runtime::RuntimeVM;
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::value::Value;
use std::rc::Rc;
use std::sync::Arc;

/// Registers available to a frame unless CALL asks for fewer.
pub const DEFAULT_REGISTER_COUNT: u8 = 32;

/// Operand stack items a single frame may add above its entry watermark.
pub const MAX_STACK_PER_FRAME: usize = 32;

/// A built-in contract implemented in host code.
///
/// Native contracts expose named methods with declared gas costs; the
/// runtime charges the cost before dispatching into the handler. Handlers
/// pop their arguments from the operand stack and push their result.
pub trait NativeContract: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the declared gas cost of a method, or `None` when the
    /// contract has no such method.
    fn method_cost(&self, method: &str) -> Option<u64>;

    fn invoke(&self, runtime: &mut RuntimeVM, method: &str) -> Result<(), VMError>;
}

/// Executable body of a context: user-deployed bytecode or a native handler.
pub enum ContextBody {
    Script(Bytes),
    Native(Arc<dyn NativeContract>),
}

/// A named executable unit the VM can switch into.
///
/// Contexts hold only their name and body; everything else (stack, gas,
/// events, state) belongs to the runtime driving them.
pub struct ExecutionContext {
    pub name: String,
    pub body: ContextBody,
}

impl ExecutionContext {
    /// Creates a script context from deployed bytecode.
    pub fn script(name: impl Into<String>, script: Bytes) -> Self {
        Self {
            name: name.into(),
            body: ContextBody::Script(script),
        }
    }

    /// Wraps a native contract as a context.
    pub fn native(contract: Arc<dyn NativeContract>) -> Self {
        Self {
            name: contract.name().to_string(),
            body: ContextBody::Native(contract),
        }
    }
}

/// Call frame: one per CALL or context switch.
///
/// The frame's `pc` doubles as the return offset: while a callee runs, the
/// suspended caller frame already points at the instruction to resume.
pub struct Frame {
    /// Identity the executing code acts as; replaced on context switches and
    /// restored on return.
    pub entry_address: Address,
    /// Context whose script this frame executes.
    pub context: Rc<ExecutionContext>,
    /// Current script offset.
    pub pc: usize,
    /// Operand stack depth at frame entry; the frame may add at most
    /// [`MAX_STACK_PER_FRAME`] items above it.
    pub stack_base: usize,
    registers: Vec<Value>,
}

impl Frame {
    pub fn new(
        context: Rc<ExecutionContext>,
        entry_address: Address,
        pc: usize,
        register_count: u8,
        stack_base: usize,
    ) -> Self {
        Self {
            entry_address,
            context,
            pc,
            stack_base,
            registers: vec![Value::None; register_count as usize],
        }
    }

    /// Returns a reference to the value in register `idx`.
    pub fn register(&self, idx: u8) -> Result<&Value, VMError> {
        self.registers
            .get(idx as usize)
            .ok_or(VMError::InvalidRegister(idx))
    }

    /// Returns a mutable reference to the value in register `idx`.
    pub fn register_mut(&mut self, idx: u8) -> Result<&mut Value, VMError> {
        self.registers
            .get_mut(idx as usize)
            .ok_or(VMError::InvalidRegister(idx))
    }

    /// Moves the value out of register `idx`, leaving `None` behind.
    pub fn take_register(&mut self, idx: u8) -> Result<Value, VMError> {
        Ok(std::mem::take(self.register_mut(idx)?))
    }

    /// Stores a value into register `idx`.
    pub fn set_register(&mut self, idx: u8, value: Value) -> Result<(), VMError> {
        *self.register_mut(idx)? = value;
        Ok(())
    }
}

/// Operand stack shared across frames.
///
/// Values pushed by a caller stay visible to the callee, which is how
/// arguments and method names travel across CALL and SWITCH boundaries.
/// Growth is bounded per frame, not globally: deep call chains are already
/// bounded by gas.
#[derive(Default)]
pub struct OperandStack {
    items: Vec<Value>,
}

impl OperandStack {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pushes a value, enforcing the per-frame growth limit.
    pub fn push(&mut self, value: Value, frame_base: usize) -> Result<(), VMError> {
        if self.items.len() >= frame_base + MAX_STACK_PER_FRAME {
            return Err(VMError::StackOverflow);
        }
        self.items.push(value);
        Ok(())
    }

    /// Pops the top of the stack.
    pub fn pop(&mut self) -> Result<Value, VMError> {
        self.items.pop().ok_or(VMError::StackUnderflow)
    }

    /// Pops the top of the stack, returning `None` when it is empty.
    pub fn try_pop(&mut self) -> Option<Value> {
        self.items.pop()
    }

    /// Returns a reference to the top of the stack.
    pub fn peek(&self) -> Result<&Value, VMError> {
        self.items.last().ok_or(VMError::StackUnderflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new(
            Rc::new(ExecutionContext::script("entry", Bytes::default())),
            Address::from_contract_name("entry"),
            0,
            DEFAULT_REGISTER_COUNT,
            0,
        )
    }

    #[test]
    fn registers_start_empty() {
        let frame = frame();
        assert_eq!(frame.register(0).unwrap(), &Value::None);
        assert_eq!(frame.register(31).unwrap(), &Value::None);
    }

    #[test]
    fn register_out_of_bounds() {
        let frame = frame();
        assert!(matches!(
            frame.register(32),
            Err(VMError::InvalidRegister(32))
        ));
    }

    #[test]
    fn take_register_leaves_none() {
        let mut frame = frame();
        frame.set_register(3, Value::from(9)).unwrap();
        assert_eq!(frame.take_register(3).unwrap(), Value::from(9));
        assert_eq!(frame.register(3).unwrap(), &Value::None);
    }

    #[test]
    fn stack_limit_is_per_frame() {
        let mut stack = OperandStack::new();
        for i in 0..MAX_STACK_PER_FRAME {
            stack.push(Value::from(i as i64), 0).unwrap();
        }
        assert!(matches!(
            stack.push(Value::None, 0),
            Err(VMError::StackOverflow)
        ));
        // A nested frame entered at the current depth gets its own headroom.
        let base = stack.len();
        stack.push(Value::None, base).unwrap();
    }

    #[test]
    fn pop_empty_underflows() {
        let mut stack = OperandStack::new();
        assert!(matches!(stack.pop(), Err(VMError::StackUnderflow)));
        assert!(stack.try_pop().is_none());
    }
}
