//! 34-byte identities discriminated into user, system, and interop kinds.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::Hash;
use crate::types::hex;
use std::fmt;

/// Address length in bytes: one kind byte, one padding byte, 32 payload bytes.
pub const ADDRESS_LEN: usize = 34;

/// Discriminant stored in the first byte of an [`Address`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum AddressKind {
    /// All-zero or malformed address.
    Invalid = 0,
    /// Derived from an account public key.
    User = 1,
    /// Derived from a contract name hash.
    System = 2,
    /// Identity on a foreign platform.
    Interop = 3,
}

/// Fixed-size 34-byte identity.
///
/// Equality is byte-wise. The kind byte partitions the space into user,
/// system, and interop addresses; the remaining bytes carry the key or name
/// hash the address was derived from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// The all-zero null address.
    pub const fn null() -> Address {
        Address([0u8; ADDRESS_LEN])
    }

    /// Builds a user address from a 32-byte public key hash.
    pub fn user(key_hash: Hash) -> Address {
        Self::with_payload(AddressKind::User, key_hash)
    }

    /// Builds an interop address from a 32-byte foreign identity hash.
    pub fn interop(identity: Hash) -> Address {
        Self::with_payload(AddressKind::Interop, identity)
    }

    /// Derives the system address of a contract from its name.
    pub fn from_contract_name(name: &str) -> Address {
        Self::with_payload(AddressKind::System, Hash::sha3().chain(name.as_bytes()).finalize())
    }

    fn with_payload(kind: AddressKind, payload: Hash) -> Address {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[0] = kind as u8;
        bytes[2..].copy_from_slice(payload.as_slice());
        Address(bytes)
    }

    /// Returns the kind discriminant of this address.
    pub fn kind(&self) -> AddressKind {
        match self.0[0] {
            1 => AddressKind::User,
            2 => AddressKind::System,
            3 => AddressKind::Interop,
            _ => AddressKind::Invalid,
        }
    }

    pub fn is_user(&self) -> bool {
        self.kind() == AddressKind::User
    }

    pub fn is_system(&self) -> bool {
        self.kind() == AddressKind::System
    }

    pub fn is_interop(&self) -> bool {
        self.kind() == AddressKind::Interop
    }

    /// True exactly when the kind byte is not a recognized discriminant,
    /// which covers the all-zero address. The four kind predicates partition
    /// the space: a user, system, or interop address is never null, whatever
    /// its payload.
    pub fn is_null(&self) -> bool {
        self.kind() == AddressKind::Invalid
    }

    /// Returns the address as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Creates an address from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`ADDRESS_LEN`].
    pub fn from_slice(slice: &[u8]) -> Option<Address> {
        if slice.len() != ADDRESS_LEN {
            return None;
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(slice);
        Some(Address(bytes))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        hex::write(f, &self.0)
    }
}

// Addresses are written raw on the wire: 34 bytes, no length prefix.
impl Encode for Address {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.0);
    }
}

impl Decode for Address {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        if input.len() < ADDRESS_LEN {
            return Err(DecodeError::UnexpectedEof);
        }
        let (bytes, rest) = input.split_at(ADDRESS_LEN);
        *input = rest;
        Ok(Address::from_slice(bytes).ok_or(DecodeError::InvalidValue)?)
    }
}
