//! Programmatic script assembly.
//!
//! [`ScriptBuilder`] emits the variable-length instruction encoding the
//! dispatch loop consumes. Used by tests and by hosts that synthesize small
//! scripts (entry scripts, trigger harnesses).

use crate::types::bytes::Bytes;
use crate::types::encoding::write_varint;
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::value::Value;

/// Incrementally builds a bytecode script.
#[derive(Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current script offset; the target of a jump emitted later.
    pub fn position(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Consumes the builder, returning the finished script.
    pub fn build(self) -> Bytes {
        Bytes::new(self.bytes)
    }

    fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.bytes.push(opcode as u8);
        self
    }

    fn reg(&mut self, r: u8) -> &mut Self {
        self.bytes.push(r);
        self
    }

    fn offset(&mut self, target: u32) -> &mut Self {
        self.bytes.extend_from_slice(&target.to_le_bytes());
        self
    }

    /// Encodes the literal payload of a value the way LOAD expects it.
    fn payload(value: &Value) -> Vec<u8> {
        match value {
            Value::None => Vec::new(),
            Value::Integer(v) => crate::types::encoding::bigint_to_flagged_le(v),
            other => other
                .as_byte_vec()
                .expect("only literal-capable values can be emitted"),
        }
    }

    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        self.op(opcode)
    }

    /// LOAD dst with a literal value.
    pub fn emit_load(&mut self, dst: u8, value: &Value) -> &mut Self {
        let payload = Self::payload(value);
        self.op(Opcode::Load).reg(dst).reg(value.tag());
        write_varint(&mut self.bytes, payload.len() as u64);
        self.bytes.extend_from_slice(&payload);
        self
    }

    pub fn emit_move(&mut self, dst: u8, src: u8) -> &mut Self {
        self.op(Opcode::Move).reg(dst).reg(src)
    }

    pub fn emit_copy(&mut self, dst: u8, src: u8) -> &mut Self {
        self.op(Opcode::Copy).reg(dst).reg(src)
    }

    pub fn emit_push(&mut self, src: u8) -> &mut Self {
        self.op(Opcode::Push).reg(src)
    }

    pub fn emit_pop(&mut self, dst: u8) -> &mut Self {
        self.op(Opcode::Pop).reg(dst)
    }

    pub fn emit_swap(&mut self, a: u8, b: u8) -> &mut Self {
        self.op(Opcode::Swap).reg(a).reg(b)
    }

    /// Binary operation `dst = a <op> b`.
    pub fn emit_binary(&mut self, opcode: Opcode, dst: u8, a: u8, b: u8) -> &mut Self {
        self.op(opcode).reg(dst).reg(a).reg(b)
    }

    /// Unary operation `dst = <op> src`.
    pub fn emit_unary(&mut self, opcode: Opcode, dst: u8, src: u8) -> &mut Self {
        self.op(opcode).reg(dst).reg(src)
    }

    pub fn emit_inc(&mut self, dst: u8) -> &mut Self {
        self.op(Opcode::Inc).reg(dst)
    }

    pub fn emit_dec(&mut self, dst: u8) -> &mut Self {
        self.op(Opcode::Dec).reg(dst)
    }

    pub fn emit_jmp(&mut self, target: u32) -> &mut Self {
        self.op(Opcode::Jmp).offset(target)
    }

    pub fn emit_jmp_if(&mut self, cond: u8, target: u32) -> &mut Self {
        self.op(Opcode::JmpIf).reg(cond).offset(target)
    }

    pub fn emit_jmp_not(&mut self, cond: u8, target: u32) -> &mut Self {
        self.op(Opcode::JmpNot).reg(cond).offset(target)
    }

    pub fn emit_call(&mut self, registers: u8, target: u32) -> &mut Self {
        self.op(Opcode::Call).reg(registers).offset(target)
    }

    pub fn emit_ret(&mut self) -> &mut Self {
        self.op(Opcode::Ret)
    }

    pub fn emit_throw(&mut self, src: u8) -> &mut Self {
        self.op(Opcode::Throw).reg(src)
    }

    pub fn emit_ctx(&mut self, dst: u8, name: u8) -> &mut Self {
        self.op(Opcode::Ctx).reg(dst).reg(name)
    }

    pub fn emit_switch(&mut self, src: u8) -> &mut Self {
        self.op(Opcode::Switch).reg(src)
    }

    pub fn emit_ext_call(&mut self, src: u8) -> &mut Self {
        self.op(Opcode::ExtCall).reg(src)
    }

    pub fn emit_put(&mut self, src: u8, map: u8, key: u8) -> &mut Self {
        self.op(Opcode::Put).reg(src).reg(map).reg(key)
    }

    pub fn emit_get(&mut self, map: u8, dst: u8, key: u8) -> &mut Self {
        self.op(Opcode::Get).reg(map).reg(dst).reg(key)
    }

    /// Emits the full calling sequence for a contract method: arguments
    /// pushed in reverse, the method name on top, then CTX and SWITCH.
    /// Clobbers registers 0 and 1.
    pub fn emit_contract_call(
        &mut self,
        contract: &str,
        method: &str,
        args: &[Value],
    ) -> &mut Self {
        for arg in args.iter().rev() {
            self.emit_load(0, arg).emit_push(0);
        }
        self.emit_load(0, &Value::from(method)).emit_push(0);
        self.emit_load(0, &Value::from(contract));
        self.emit_ctx(1, 0);
        self.emit_switch(1)
    }

    /// Emits an interop call: arguments pushed in reverse, then EXTCALL with
    /// the method name. Clobbers register 0.
    pub fn emit_interop(&mut self, method: &str, args: &[Value]) -> &mut Self {
        for arg in args.iter().rev() {
            self.emit_load(0, arg).emit_push(0);
        }
        self.emit_load(0, &Value::from(method));
        self.emit_ext_call(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_encoding_layout() {
        let mut builder = ScriptBuilder::new();
        builder.emit_load(2, &Value::from(5));
        let script = builder.build();
        // opcode, dst, tag, varint len, payload
        assert_eq!(
            script.as_slice(),
            &[Opcode::Load as u8, 2, 1, 1, 5]
        );
    }

    #[test]
    fn jump_targets_are_absolute_little_endian() {
        let mut builder = ScriptBuilder::new();
        builder.emit_jmp(0x0102_0304);
        assert_eq!(
            builder.build().as_slice(),
            &[Opcode::Jmp as u8, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn position_tracks_emitted_bytes() {
        let mut builder = ScriptBuilder::new();
        assert_eq!(builder.position(), 0);
        builder.emit(Opcode::Nop).emit(Opcode::Nop);
        assert_eq!(builder.position(), 2);
    }
}
