//! Dynamically-typed values manipulated by the VM.
//!
//! Every value carries a runtime type tag; coercions between types are
//! explicit and fail the executing opcode rather than guessing. Integer math
//! is arbitrary-precision throughout.

use crate::types::address::{ADDRESS_LEN, Address};
use crate::types::encoding::{
    EncodeSink, bigint_from_flagged_le, bigint_to_flagged_le, write_varint,
};
use crate::virtual_machine::errors::VMError;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::cmp::Ordering;

/// A value held in a register or on the operand stack.
///
/// `Struct` preserves field insertion order. `Object` is an opaque handle
/// produced by context loads and external calls; only the runtime that
/// issued the handle can resolve it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    None,
    Integer(BigInt),
    Bytes(Vec<u8>),
    String(String),
    Bool(bool),
    Timestamp(u32),
    Address(Address),
    Struct(Vec<(String, Value)>),
    Object(u32),
}

impl Value {
    /// Returns the type name for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Integer(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::Timestamp(_) => "timestamp",
            Value::Address(_) => "address",
            Value::Struct(_) => "struct",
            Value::Object(_) => "object",
        }
    }

    /// Returns the canonical type tag used in serialized form.
    pub const fn tag(&self) -> u8 {
        match self {
            Value::None => 0,
            Value::Integer(_) => 1,
            Value::Bytes(_) => 2,
            Value::String(_) => 3,
            Value::Bool(_) => 4,
            Value::Timestamp(_) => 5,
            Value::Address(_) => 6,
            Value::Struct(_) => 7,
            Value::Object(_) => 8,
        }
    }

    /// Decodes a literal from a LOAD instruction payload.
    pub fn from_literal(tag: u8, payload: &[u8]) -> Result<Value, VMError> {
        match tag {
            0 if payload.is_empty() => Ok(Value::None),
            1 => Ok(Value::Integer(bigint_from_flagged_le(payload))),
            2 => Ok(Value::Bytes(payload.to_vec())),
            3 => String::from_utf8(payload.to_vec())
                .map(Value::String)
                .map_err(|_| VMError::DecodeFailed),
            4 if payload.len() == 1 => Ok(Value::Bool(payload[0] != 0)),
            5 if payload.len() == 4 => {
                Ok(Value::Timestamp(u32::from_le_bytes(payload.try_into().unwrap())))
            }
            6 => Address::from_slice(payload)
                .map(Value::Address)
                .ok_or(VMError::DecodeFailed),
            _ => Err(VMError::DecodeFailed),
        }
    }

    /// Writes the canonical byte form used for hashing and cross-value
    /// comparison: `type(u8) | payload`, struct fields in insertion order as
    /// `name(varstring) | type(u8) | payload`.
    pub fn encode_canonical<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[self.tag()]);
        match self {
            Value::None => {}
            Value::Integer(v) => {
                let bytes = bigint_to_flagged_le(v);
                write_varint(out, bytes.len() as u64);
                out.write(&bytes);
            }
            Value::Bytes(v) => {
                write_varint(out, v.len() as u64);
                out.write(v);
            }
            Value::String(v) => {
                write_varint(out, v.len() as u64);
                out.write(v.as_bytes());
            }
            Value::Bool(v) => out.write(&[*v as u8]),
            Value::Timestamp(v) => out.write(&v.to_le_bytes()),
            Value::Address(v) => out.write(v.as_slice()),
            Value::Struct(fields) => {
                for (name, value) in fields {
                    write_varint(out, name.len() as u64);
                    out.write(name.as_bytes());
                    value.encode_canonical(out);
                }
            }
            Value::Object(handle) => out.write(&handle.to_le_bytes()),
        }
    }

    /// Returns the canonical byte form as a fresh buffer.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_canonical(&mut out);
        out
    }

    /// Coerces this value to an integer.
    ///
    /// Bytes are read as an unsigned little-endian magnitude with the sign
    /// bit in the highest byte.
    pub fn as_integer(&self) -> Result<BigInt, VMError> {
        match self {
            Value::Integer(v) => Ok(v.clone()),
            Value::Bytes(v) => Ok(bigint_from_flagged_le(v)),
            Value::Bool(v) => Ok(BigInt::from(*v as u8)),
            Value::Timestamp(v) => Ok(BigInt::from(*v)),
            Value::String(v) => v.parse::<BigInt>().map_err(|_| VMError::InvalidCast {
                from: "string",
                to: "integer",
            }),
            other => Err(VMError::InvalidCast {
                from: other.type_name(),
                to: "integer",
            }),
        }
    }

    /// Coerces this value to a boolean.
    pub fn as_bool(&self) -> Result<bool, VMError> {
        match self {
            Value::Bool(v) => Ok(*v),
            Value::Integer(v) => Ok(!v.is_zero()),
            other => Err(VMError::InvalidCast {
                from: other.type_name(),
                to: "bool",
            }),
        }
    }

    /// Coerces this value to text.
    pub fn as_string(&self) -> Result<String, VMError> {
        match self {
            Value::String(v) => Ok(v.clone()),
            Value::Integer(v) => Ok(v.to_string()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::Timestamp(v) => Ok(v.to_string()),
            Value::Address(v) => Ok(v.to_string()),
            Value::Bytes(v) => String::from_utf8(v.clone()).map_err(|_| VMError::InvalidCast {
                from: "bytes",
                to: "string",
            }),
            other => Err(VMError::InvalidCast {
                from: other.type_name(),
                to: "string",
            }),
        }
    }

    /// Coerces this value to raw bytes.
    pub fn as_byte_vec(&self) -> Result<Vec<u8>, VMError> {
        match self {
            Value::None => Ok(Vec::new()),
            Value::Bytes(v) => Ok(v.clone()),
            Value::String(v) => Ok(v.as_bytes().to_vec()),
            Value::Integer(v) => Ok(bigint_to_flagged_le(v)),
            Value::Bool(v) => Ok(vec![*v as u8]),
            Value::Timestamp(v) => Ok(v.to_le_bytes().to_vec()),
            Value::Address(v) => Ok(v.as_slice().to_vec()),
            Value::Struct(_) => Ok(self.canonical_bytes()),
            Value::Object(_) => Err(VMError::InvalidCast {
                from: "object",
                to: "bytes",
            }),
        }
    }

    /// Coerces this value to an address.
    pub fn as_address(&self) -> Result<Address, VMError> {
        match self {
            Value::Address(v) => Ok(*v),
            Value::Bytes(v) if v.len() == ADDRESS_LEN => {
                Ok(Address::from_slice(v).expect("length checked"))
            }
            other => Err(VMError::InvalidCast {
                from: other.type_name(),
                to: "address",
            }),
        }
    }

    /// Coerces this value to a timestamp.
    pub fn as_timestamp(&self) -> Result<u32, VMError> {
        match self {
            Value::Timestamp(v) => Ok(*v),
            Value::Integer(v) => v.to_u32().ok_or(VMError::InvalidCast {
                from: "integer",
                to: "timestamp",
            }),
            other => Err(VMError::InvalidCast {
                from: other.type_name(),
                to: "timestamp",
            }),
        }
    }

    /// Orders two values for the comparison opcodes.
    ///
    /// Only integers and strings are ordered; comparing anything else fails
    /// the opcode.
    pub fn try_compare(&self, other: &Value, opcode: &'static str) -> Result<Ordering, VMError> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            (a, b) => Err(VMError::TypeMismatch {
                opcode,
                expected: "two integers or two strings",
                actual: if a.type_name() == b.type_name() {
                    a.type_name()
                } else {
                    "mixed types"
                },
            }),
        }
    }

    /// Looks up a struct field, treating `None` as the empty struct.
    pub fn struct_get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.iter().find(|(name, _)| name == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Inserts or replaces a struct field, preserving insertion order.
    pub fn struct_put(&mut self, key: String, value: Value) {
        if let Value::Struct(fields) = self {
            if let Some(slot) = fields.iter_mut().find(|(name, _)| *name == key) {
                slot.1 = value;
            } else {
                fields.push((key, value));
            }
        }
    }

    /// Takes ownership of a negative/zero/positive sign indicator.
    pub fn sign(&self) -> Result<BigInt, VMError> {
        let v = self.as_integer()?;
        Ok(BigInt::from(v.signum().to_i8().unwrap_or(0)))
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::None
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(BigInt::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Address> for Value {
    fn from(v: Address) -> Self {
        Value::Address(v)
    }
}
