//! Opcode dispatch.
//!
//! The runtime itself is the dispatch receiver: every handler runs with full
//! access to gas, events, contexts, and the change set, so contexts stay
//! plain data and no cyclic references form between them and the VM.

use crate::runtime::RuntimeVM;
use crate::types::address::Address;
use crate::types::encoding::read_varint;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::stack::{
    ContextBody, DEFAULT_REGISTER_COUNT, ExecutionContext, Frame,
};
use crate::virtual_machine::value::Value;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::rc::Rc;

/// Reads operands out of a script, tracking the advancing offset.
struct Cursor<'a> {
    bytes: &'a [u8],
    pc: usize,
}

impl Cursor<'_> {
    fn u8(&mut self) -> Result<u8, VMError> {
        let byte = *self
            .bytes
            .get(self.pc)
            .ok_or(VMError::UnexpectedEndOfScript)?;
        self.pc += 1;
        Ok(byte)
    }

    fn u32(&mut self) -> Result<u32, VMError> {
        let end = self.pc + 4;
        let bytes = self
            .bytes
            .get(self.pc..end)
            .ok_or(VMError::UnexpectedEndOfScript)?;
        self.pc = end;
        Ok(u32::from_le_bytes(bytes.try_into().expect("slice is 4 bytes")))
    }

    fn data(&mut self) -> Result<Vec<u8>, VMError> {
        let mut rest = self
            .bytes
            .get(self.pc..)
            .ok_or(VMError::UnexpectedEndOfScript)?;
        let before = rest.len();
        let len = read_varint(&mut rest).map_err(|_| VMError::UnexpectedEndOfScript)?;
        self.pc += before - rest.len();

        let len = usize::try_from(len).map_err(|_| VMError::UnexpectedEndOfScript)?;
        let end = self
            .pc
            .checked_add(len)
            .ok_or(VMError::UnexpectedEndOfScript)?;
        let payload = self
            .bytes
            .get(self.pc..end)
            .ok_or(VMError::UnexpectedEndOfScript)?;
        self.pc = end;
        Ok(payload.to_vec())
    }
}

impl RuntimeVM {
    /// Pushes the entry frame and drains it.
    pub(crate) fn run(&mut self) -> Result<(), VMError> {
        let frame = Frame::new(
            self.current_context.clone(),
            self.entry_address,
            0,
            DEFAULT_REGISTER_COUNT,
            self.stack.len(),
        );
        self.frames.push(frame);
        self.run_until_depth(0)
    }

    /// Steps until the frame stack shrinks back to `depth`.
    pub(crate) fn run_until_depth(&mut self, depth: usize) -> Result<(), VMError> {
        while self.frames.len() > depth {
            self.step()?;
        }
        Ok(())
    }

    /// Fetches, meters, decodes, and executes one instruction.
    fn step(&mut self) -> Result<(), VMError> {
        let (script, pc) = {
            let frame = self.frames.last().ok_or(VMError::StackUnderflow)?;
            match &frame.context.body {
                ContextBody::Script(bytes) => (bytes.clone(), frame.pc),
                // Native contexts are dispatched inline by SWITCH and never
                // become frames.
                ContextBody::Native(_) => {
                    return Err(VMError::ContextNotFound(frame.context.name.clone()));
                }
            }
        };

        // Running past the end of the script is an implicit RET.
        if pc >= script.len() {
            return self.op_ret();
        }

        let opcode = Opcode::try_from(script[pc])?;
        self.current_opcode = Some(opcode.mnemonic());
        self.gas.validate_opcode(opcode)?;

        let script_len = script.len();
        let mut cursor = Cursor {
            bytes: script.as_slice(),
            pc: pc + 1,
        };

        match opcode {
            Opcode::Nop => {
                self.commit_pc(cursor.pc)?;
            }
            Opcode::Move => {
                let (dst, src) = (cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let value = self.take_reg(src)?;
                self.set_reg(dst, value)?;
            }
            Opcode::Copy => {
                let (dst, src) = (cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let value = self.reg_clone(src)?;
                self.set_reg(dst, value)?;
            }
            Opcode::Push => {
                let src = cursor.u8()?;
                self.commit_pc(cursor.pc)?;
                let value = self.reg_clone(src)?;
                self.push_value(value)?;
            }
            Opcode::Pop => {
                let dst = cursor.u8()?;
                self.commit_pc(cursor.pc)?;
                let value = self.stack.pop()?;
                self.set_reg(dst, value)?;
            }
            Opcode::Swap => {
                let (a, b) = (cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let left = self.take_reg(a)?;
                let right = self.take_reg(b)?;
                self.set_reg(a, right)?;
                self.set_reg(b, left)?;
            }
            Opcode::Load => {
                let (dst, tag) = (cursor.u8()?, cursor.u8()?);
                let payload = cursor.data()?;
                self.commit_pc(cursor.pc)?;
                let value = Value::from_literal(tag, &payload)?;
                self.set_reg(dst, value)?;
            }
            Opcode::Call => {
                let (registers, target) = (cursor.u8()?, cursor.u32()?);
                self.commit_pc(cursor.pc)?;
                self.op_call(registers, target, script_len)?;
            }
            Opcode::ExtCall => {
                let src = cursor.u8()?;
                self.commit_pc(cursor.pc)?;
                self.op_extcall(src)?;
            }
            Opcode::Jmp => {
                let target = cursor.u32()?;
                self.commit_pc(cursor.pc)?;
                self.jump(target, script_len)?;
            }
            Opcode::JmpIf => {
                let (cond, target) = (cursor.u8()?, cursor.u32()?);
                self.commit_pc(cursor.pc)?;
                if self.reg_clone(cond)?.as_bool()? {
                    self.jump(target, script_len)?;
                }
            }
            Opcode::JmpNot => {
                let (cond, target) = (cursor.u8()?, cursor.u32()?);
                self.commit_pc(cursor.pc)?;
                if !self.reg_clone(cond)?.as_bool()? {
                    self.jump(target, script_len)?;
                }
            }
            Opcode::Ret => {
                self.commit_pc(cursor.pc)?;
                self.op_ret()?;
            }
            Opcode::Throw => {
                let src = cursor.u8()?;
                self.commit_pc(cursor.pc)?;
                let value = self.reg_clone(src)?;
                let message = value
                    .as_string()
                    .unwrap_or_else(|_| format!("{value:?}"));
                return Err(VMError::Thrown(message));
            }
            Opcode::Cat => {
                let (dst, a, b) = (cursor.u8()?, cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let mut bytes = self.reg_clone(a)?.as_byte_vec()?;
                bytes.extend(self.reg_clone(b)?.as_byte_vec()?);
                self.set_reg(dst, Value::Bytes(bytes))?;
            }
            Opcode::Size => {
                let (dst, src) = (cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let len = self.reg_clone(src)?.as_byte_vec()?.len();
                self.set_reg(dst, Value::Integer(BigInt::from(len)))?;
            }
            Opcode::Not => {
                let (dst, src) = (cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let value = self.reg_clone(src)?.as_bool()?;
                self.set_reg(dst, Value::Bool(!value))?;
            }
            Opcode::And | Opcode::Or | Opcode::Xor => {
                let (dst, a, b) = (cursor.u8()?, cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let left = self.reg_clone(a)?.as_bool()?;
                let right = self.reg_clone(b)?.as_bool()?;
                let result = match opcode {
                    Opcode::And => left && right,
                    Opcode::Or => left || right,
                    _ => left ^ right,
                };
                self.set_reg(dst, Value::Bool(result))?;
            }
            Opcode::Equal => {
                let (dst, a, b) = (cursor.u8()?, cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let equal = self.reg_clone(a)? == self.reg_clone(b)?;
                self.set_reg(dst, Value::Bool(equal))?;
            }
            Opcode::Lt | Opcode::Gt | Opcode::Lte | Opcode::Gte => {
                let (dst, a, b) = (cursor.u8()?, cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let left = self.reg_clone(a)?;
                let right = self.reg_clone(b)?;
                let ordering = left.try_compare(&right, opcode.mnemonic())?;
                let result = match opcode {
                    Opcode::Lt => ordering == Ordering::Less,
                    Opcode::Gt => ordering == Ordering::Greater,
                    Opcode::Lte => ordering != Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                self.set_reg(dst, Value::Bool(result))?;
            }
            Opcode::Inc => {
                let dst = cursor.u8()?;
                self.commit_pc(cursor.pc)?;
                let value = self.reg_clone(dst)?.as_integer()?;
                self.set_reg(dst, Value::Integer(value + 1))?;
            }
            Opcode::Dec => {
                let dst = cursor.u8()?;
                self.commit_pc(cursor.pc)?;
                let value = self.reg_clone(dst)?.as_integer()?;
                self.set_reg(dst, Value::Integer(value - 1))?;
            }
            Opcode::Sign => {
                let (dst, src) = (cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let sign = self.reg_clone(src)?.sign()?;
                self.set_reg(dst, Value::Integer(sign))?;
            }
            Opcode::Negate => {
                let (dst, src) = (cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let value = self.reg_clone(src)?.as_integer()?;
                self.set_reg(dst, Value::Integer(-value))?;
            }
            Opcode::Abs => {
                let (dst, src) = (cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let value = self.reg_clone(src)?.as_integer()?;
                self.set_reg(dst, Value::Integer(value.abs()))?;
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Min
            | Opcode::Max => {
                let (dst, a, b) = (cursor.u8()?, cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let left = self.reg_clone(a)?.as_integer()?;
                let right = self.reg_clone(b)?.as_integer()?;
                let result = Self::int_binary(opcode, left, right)?;
                self.set_reg(dst, Value::Integer(result))?;
            }
            Opcode::Ctx => {
                let (dst, name) = (cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                self.op_ctx(dst, name)?;
            }
            Opcode::Switch => {
                let src = cursor.u8()?;
                self.commit_pc(cursor.pc)?;
                self.op_switch(src)?;
            }
            Opcode::Put => {
                let (src, map, key) = (cursor.u8()?, cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                self.op_put(src, map, key)?;
            }
            Opcode::Get => {
                let (map, dst, key) = (cursor.u8()?, cursor.u8()?, cursor.u8()?);
                self.commit_pc(cursor.pc)?;
                let key = self.reg_clone(key)?.as_string()?;
                let found = self
                    .frame_ref()?
                    .register(map)?
                    .struct_get(&key)
                    .cloned()
                    .unwrap_or(Value::None);
                self.set_reg(dst, found)?;
            }
        }
        Ok(())
    }

    fn int_binary(opcode: Opcode, left: BigInt, right: BigInt) -> Result<BigInt, VMError> {
        let result = match opcode {
            Opcode::Add => left + right,
            Opcode::Sub => left - right,
            Opcode::Mul => left * right,
            Opcode::Div => {
                if right.is_zero() {
                    return Err(VMError::DivisionByZero);
                }
                left / right
            }
            Opcode::Mod => {
                if right.is_zero() {
                    return Err(VMError::DivisionByZero);
                }
                left % right
            }
            Opcode::Shl | Opcode::Shr => {
                let shift = right.to_usize().ok_or(VMError::InvalidCast {
                    from: "integer",
                    to: "shift amount",
                })?;
                if opcode == Opcode::Shl {
                    left << shift
                } else {
                    left >> shift
                }
            }
            Opcode::Min => left.min(right),
            _ => left.max(right),
        };
        Ok(result)
    }

    // ==================== Control flow ====================

    fn jump(&mut self, target: u32, script_len: usize) -> Result<(), VMError> {
        if target as usize > script_len {
            return Err(VMError::InvalidJumpTarget(target));
        }
        self.frame_mut()?.pc = target as usize;
        Ok(())
    }

    fn op_call(&mut self, registers: u8, target: u32, script_len: usize) -> Result<(), VMError> {
        if target as usize > script_len {
            return Err(VMError::InvalidJumpTarget(target));
        }
        let (context, entry_address) = {
            let frame = self.frame_ref()?;
            (frame.context.clone(), frame.entry_address)
        };
        let frame = Frame::new(
            context,
            entry_address,
            target as usize,
            registers,
            self.stack.len(),
        );
        self.frames.push(frame);
        Ok(())
    }

    /// Pops the current frame, restoring the caller's context and entry
    /// address when the frame crossed a context boundary.
    pub(crate) fn op_ret(&mut self) -> Result<(), VMError> {
        let popped = self.frames.pop().ok_or(VMError::StackUnderflow)?;
        if let Some(top) = self.frames.last() {
            if !Rc::ptr_eq(&top.context, &popped.context) {
                self.previous_context = Some(popped.context);
                self.current_context = top.context.clone();
                self.entry_address = top.entry_address;
            }
        }
        Ok(())
    }

    // ==================== Contexts ====================

    /// Resolves a contract name to a context.
    ///
    /// During block operations only the token contract may be entered.
    pub(crate) fn load_context(&mut self, name: &str) -> Result<Rc<ExecutionContext>, VMError> {
        if self.gas.in_block_operation() && name != crate::core::nexus::contracts::TOKEN {
            return Err(VMError::ContextUnavailable(name.to_string()));
        }
        let context = self
            .nexus
            .alloc_contract_by_name(name)
            .ok_or_else(|| VMError::ContextNotFound(name.to_string()))?;
        Ok(Rc::new(context))
    }

    /// Switches execution into a loaded context.
    ///
    /// Script contexts run as a new frame whose entry address derives from
    /// the context name; native contexts dispatch inline after popping the
    /// method name and charging its declared cost.
    pub(crate) fn switch_context(&mut self, context: Rc<ExecutionContext>) -> Result<(), VMError> {
        match &context.body {
            ContextBody::Script(_) => {
                let derived = Address::from_contract_name(&context.name);
                self.previous_context = Some(self.current_context.clone());
                self.current_context = context.clone();
                self.entry_address = derived;
                let frame = Frame::new(
                    context,
                    derived,
                    0,
                    DEFAULT_REGISTER_COUNT,
                    self.stack.len(),
                );
                self.frames.push(frame);
                Ok(())
            }
            ContextBody::Native(contract) => {
                let contract = contract.clone();
                let method = self.stack.pop()?.as_string()?;
                let cost = contract
                    .method_cost(&method)
                    .ok_or_else(|| VMError::UnknownMethod {
                        contract: context.name.clone(),
                        method: method.clone(),
                    })?;
                self.gas.consume(cost)?;

                let saved_context =
                    std::mem::replace(&mut self.current_context, context.clone());
                let saved_entry = self.entry_address;
                self.entry_address = Address::from_contract_name(&context.name);
                self.previous_context = Some(saved_context.clone());

                let result = contract.invoke(self, &method);

                self.current_context = saved_context;
                self.entry_address = saved_entry;
                self.previous_context = Some(context);
                result
            }
        }
    }

    fn op_ctx(&mut self, dst: u8, name: u8) -> Result<(), VMError> {
        let name = self.reg_clone(name)?.as_string()?;
        let context = self.load_context(&name)?;
        let handle = self.loaded_contexts.len() as u32;
        self.loaded_contexts.push(context);
        self.set_reg(dst, Value::Object(handle))
    }

    fn op_switch(&mut self, src: u8) -> Result<(), VMError> {
        let value = self.reg_clone(src)?;
        let Value::Object(handle) = value else {
            return Err(VMError::TypeMismatch {
                opcode: "SWITCH",
                expected: "context object",
                actual: value.type_name(),
            });
        };
        let context = self
            .loaded_contexts
            .get(handle as usize)
            .cloned()
            .ok_or(VMError::TypeMismatch {
                opcode: "SWITCH",
                expected: "context object",
                actual: "stale handle",
            })?;
        self.switch_context(context)
    }

    // ==================== Frame memory ====================

    fn op_put(&mut self, src: u8, map: u8, key: u8) -> Result<(), VMError> {
        let key = self.reg_clone(key)?.as_string()?;
        let value = self.take_reg(src)?;
        let slot = self.frame_mut()?.register_mut(map)?;
        if matches!(slot, Value::None) {
            *slot = Value::Struct(Vec::new());
        }
        if !matches!(slot, Value::Struct(_)) {
            return Err(VMError::TypeMismatch {
                opcode: "PUT",
                expected: "struct",
                actual: slot.type_name(),
            });
        }
        slot.struct_put(key, value);
        Ok(())
    }

    // ==================== Interop ====================

    fn op_extcall(&mut self, src: u8) -> Result<(), VMError> {
        let name = self.reg_clone(src)?.as_string()?;
        let handler = self
            .extcall_handler(&name)
            .ok_or_else(|| VMError::UnknownExtCall(name))?;
        handler(self)
    }

    // ==================== Register helpers ====================

    fn frame_ref(&self) -> Result<&Frame, VMError> {
        self.frames.last().ok_or(VMError::StackUnderflow)
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, VMError> {
        self.frames.last_mut().ok_or(VMError::StackUnderflow)
    }

    fn commit_pc(&mut self, pc: usize) -> Result<(), VMError> {
        self.frame_mut()?.pc = pc;
        Ok(())
    }

    fn reg_clone(&self, idx: u8) -> Result<Value, VMError> {
        Ok(self.frame_ref()?.register(idx)?.clone())
    }

    fn take_reg(&mut self, idx: u8) -> Result<Value, VMError> {
        self.frame_mut()?.take_register(idx)
    }

    fn set_reg(&mut self, idx: u8, value: Value) -> Result<(), VMError> {
        self.frame_mut()?.set_register(idx, value)
    }
}
