//! Instruction set definitions.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! opcode list and invokes a callback macro for code generation, so the
//! dispatch loop and the script builder share one definition.
//!
//! This module generates:
//! - The [`Opcode`] enum with byte mappings
//! - `TryFrom<u8>` for decoding
//! - `mnemonic()` and `gas_cost()` lookups
//!
//! # Script Format
//!
//! Instructions use variable-length encoding:
//! - Opcode: 1 byte
//! - Register operand: 1 byte
//! - Immediate u8: 1 byte
//! - Offset u32: 4 bytes (little-endian, absolute script position)
//! - Literal payload: varint length followed by raw bytes
//!
//! # Gas
//!
//! The per-opcode costs in the table below are consensus-critical: every
//! node must charge identical amounts for a transaction to reach the same
//! terminal state everywhere.

use crate::virtual_machine::errors::VMError;

/// Invokes a callback macro with the complete opcode definition list.
///
/// Each entry is `Name = byte, "MNEMONIC" => [operand: Kind, ...], gas`.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Stack and data movement
            // =========================
            /// NOP ; does nothing
            Nop = 0x00, "NOP" => [], 0,
            /// MOVE dst, src ; dst = src, src becomes none
            Move = 0x01, "MOVE" => [dst: Reg, src: Reg], 1,
            /// COPY dst, src ; dst = clone of src
            Copy = 0x02, "COPY" => [dst: Reg, src: Reg], 1,
            /// PUSH src ; push register onto the operand stack
            Push = 0x03, "PUSH" => [src: Reg], 1,
            /// POP dst ; pop top of stack into register
            Pop = 0x04, "POP" => [dst: Reg], 1,
            /// SWAP a, b ; exchange two registers
            Swap = 0x05, "SWAP" => [a: Reg, b: Reg], 1,
            /// LOAD dst, kind, payload ; load a literal into a register
            Load = 0x06, "LOAD" => [dst: Reg, kind: ImmU8, data: Data], 2,
            // =========================
            // Control flow
            // =========================
            /// CALL regs, offset ; push a frame with `regs` registers
            Call = 0x07, "CALL" => [regs: ImmU8, offset: OffU32], 2,
            /// EXTCALL src ; invoke the host method named in src
            ExtCall = 0x08, "EXTCALL" => [src: Reg], 3,
            /// JMP offset ; unconditional jump
            Jmp = 0x09, "JMP" => [offset: OffU32], 1,
            /// JMPIF cond, offset ; jump when cond is true
            JmpIf = 0x0A, "JMPIF" => [cond: Reg, offset: OffU32], 1,
            /// JMPNOT cond, offset ; jump when cond is false
            JmpNot = 0x0B, "JMPNOT" => [cond: Reg, offset: OffU32], 1,
            /// RET ; pop the current frame, halting on the last one
            Ret = 0x0C, "RET" => [], 0,
            /// THROW src ; fault with the message in src
            Throw = 0x0D, "THROW" => [src: Reg], 1,
            // =========================
            // Bytes and logic
            // =========================
            /// CAT dst, a, b ; byte concatenation
            Cat = 0x0E, "CAT" => [dst: Reg, a: Reg, b: Reg], 1,
            /// SIZE dst, src ; byte length of src
            Size = 0x0F, "SIZE" => [dst: Reg, src: Reg], 1,
            /// NOT dst, src ; boolean negation
            Not = 0x10, "NOT" => [dst: Reg, src: Reg], 1,
            /// AND dst, a, b
            And = 0x11, "AND" => [dst: Reg, a: Reg, b: Reg], 1,
            /// OR dst, a, b
            Or = 0x12, "OR" => [dst: Reg, a: Reg, b: Reg], 1,
            /// XOR dst, a, b
            Xor = 0x13, "XOR" => [dst: Reg, a: Reg, b: Reg], 1,
            /// EQUAL dst, a, b ; structural equality
            Equal = 0x14, "EQUAL" => [dst: Reg, a: Reg, b: Reg], 1,
            /// LT dst, a, b
            Lt = 0x15, "LT" => [dst: Reg, a: Reg, b: Reg], 1,
            /// GT dst, a, b
            Gt = 0x16, "GT" => [dst: Reg, a: Reg, b: Reg], 1,
            /// LTE dst, a, b
            Lte = 0x17, "LTE" => [dst: Reg, a: Reg, b: Reg], 1,
            /// GTE dst, a, b
            Gte = 0x18, "GTE" => [dst: Reg, a: Reg, b: Reg], 1,
            // =========================
            // Integer arithmetic
            // =========================
            /// INC dst ; dst += 1
            Inc = 0x19, "INC" => [dst: Reg], 1,
            /// DEC dst ; dst -= 1
            Dec = 0x1A, "DEC" => [dst: Reg], 1,
            /// SIGN dst, src ; -1, 0 or 1
            Sign = 0x1B, "SIGN" => [dst: Reg, src: Reg], 1,
            /// NEGATE dst, src ; dst = -src
            Negate = 0x1C, "NEGATE" => [dst: Reg, src: Reg], 1,
            /// ABS dst, src ; dst = |src|
            Abs = 0x1D, "ABS" => [dst: Reg, src: Reg], 1,
            /// ADD dst, a, b
            Add = 0x1E, "ADD" => [dst: Reg, a: Reg, b: Reg], 1,
            /// SUB dst, a, b
            Sub = 0x1F, "SUB" => [dst: Reg, a: Reg, b: Reg], 1,
            /// MUL dst, a, b
            Mul = 0x20, "MUL" => [dst: Reg, a: Reg, b: Reg], 1,
            /// DIV dst, a, b ; truncates toward zero, faults on zero divisor
            Div = 0x21, "DIV" => [dst: Reg, a: Reg, b: Reg], 1,
            /// MOD dst, a, b ; faults on zero divisor
            Mod = 0x22, "MOD" => [dst: Reg, a: Reg, b: Reg], 1,
            /// SHL dst, a, b
            Shl = 0x23, "SHL" => [dst: Reg, a: Reg, b: Reg], 1,
            /// SHR dst, a, b
            Shr = 0x24, "SHR" => [dst: Reg, a: Reg, b: Reg], 1,
            /// MIN dst, a, b
            Min = 0x25, "MIN" => [dst: Reg, a: Reg, b: Reg], 1,
            /// MAX dst, a, b
            Max = 0x26, "MAX" => [dst: Reg, a: Reg, b: Reg], 1,
            // =========================
            // Contexts
            // =========================
            /// CTX dst, name ; load the contract named in `name` into dst
            Ctx = 0x27, "CTX" => [dst: Reg, name: Reg], 5,
            /// SWITCH src ; run the context held in src to completion
            Switch = 0x28, "SWITCH" => [src: Reg], 10,
            // =========================
            // Frame memory
            // =========================
            /// PUT src, map, key ; map[key] = src
            Put = 0x29, "PUT" => [src: Reg, map: Reg, key: Reg], 2,
            /// GET map, dst, key ; dst = map[key]
            Get = 0x2A, "GET" => [map: Reg, dst: Reg, key: Reg], 2,
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $byte:literal, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ], $gas:expr
        ),* $(,)?
    ) => {
        /// One-byte opcodes of the execution core's instruction set.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $byte,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $byte => Ok(Opcode::$name), )*
                    _ => Err(VMError::UnknownOpcode(value)),
                }
            }
        }

        impl Opcode {
            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the consensus gas cost for this opcode.
            pub const fn gas_cost(&self) -> u64 {
                match self {
                    $( Opcode::$name => $gas, )*
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);
