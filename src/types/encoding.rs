//! Binary encoding and decoding traits for deterministic serialization.
//!
//! All encoded data uses little-endian byte order. Variable-length data
//! (byte strings, text, collections) carries a compact varint length prefix,
//! which is the wire form events and oracle entities are defined in.
//!
//! # Binary Format
//!
//! - Integers: little-endian, fixed-width
//! - `bool`: single byte (0 = false, 1 = true)
//! - varint: 1 byte below 0xFD; `0xFD` + u16, `0xFE` + u32, `0xFF` + u64
//! - `Vec<T>`/`String`: varint count followed by elements (varbytes /
//!   varstring when the element is a byte)
//! - `Option<T>`: 1-byte tag (0 = None, 1 = Some) followed by the value
//! - Arrays `[u8; N]`: raw bytes, no length prefix
//! - `BigInt`: varbytes of the little-endian magnitude, sign flag in the
//!   highest bit of the highest byte

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;

/// Decoded collections refuse length prefixes above this bound.
const MAX_DECODE_LEN: u64 = 1 << 24;

/// Sink for writing encoded bytes.
///
/// Implemented by byte buffers and hashers to allow encoding directly into
/// the target without intermediate allocations.
pub trait EncodeSink {
    /// Writes the given bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

/// Counter for computing encoded size without allocating memory.
///
/// Used by `Encode::to_bytes` to pre-allocate exact capacity before encoding.
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }
}

impl Default for SizeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Trait for types that can be serialized to binary format.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Serializes to a new byte buffer with exact capacity.
    ///
    /// Performs two passes: first to count bytes, then to encode.
    fn to_bytes(&self) -> Vec<u8> {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);

        let mut out = Vec::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }
}

/// Errors that can occur during decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before expected data was read.
    UnexpectedEof,
    /// Data does not represent a valid value for the target type.
    InvalidValue,
    /// Length prefix exceeds the maximum allowed size.
    LengthOverflow,
}

/// Trait for types that can be deserialized from binary format.
pub trait Decode: Sized {
    /// Reads and decodes a value from the input buffer.
    ///
    /// Advances the input slice past the consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value from a byte slice, requiring all bytes to be consumed.
    ///
    /// Returns `InvalidValue` if trailing bytes remain after decoding.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;

        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }

        Ok(value)
    }
}

/// Reads exactly `n` bytes from the input, advancing the slice.
pub(crate) fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

/// Writes a compact variable-length integer.
pub fn write_varint<S: EncodeSink>(out: &mut S, value: u64) {
    if value < 0xFD {
        out.write(&[value as u8]);
    } else if value <= u16::MAX as u64 {
        out.write(&[0xFD]);
        out.write(&(value as u16).to_le_bytes());
    } else if value <= u32::MAX as u64 {
        out.write(&[0xFE]);
        out.write(&(value as u32).to_le_bytes());
    } else {
        out.write(&[0xFF]);
        out.write(&value.to_le_bytes());
    }
}

/// Reads a compact variable-length integer.
pub fn read_varint(input: &mut &[u8]) -> Result<u64, DecodeError> {
    let tag = read_bytes(input, 1)?[0];
    let value = match tag {
        0xFD => u16::from_le_bytes(read_bytes(input, 2)?.try_into().unwrap()) as u64,
        0xFE => u32::from_le_bytes(read_bytes(input, 4)?.try_into().unwrap()) as u64,
        0xFF => u64::from_le_bytes(read_bytes(input, 8)?.try_into().unwrap()),
        small => small as u64,
    };
    Ok(value)
}

/// Reads a varint length prefix, bounded by [`MAX_DECODE_LEN`].
fn read_length(input: &mut &[u8]) -> Result<usize, DecodeError> {
    let len = read_varint(input)?;
    if len > MAX_DECODE_LEN {
        return Err(DecodeError::LengthOverflow);
    }
    Ok(len as usize)
}

macro_rules! impl_codec_for_int {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $ty {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let bytes = read_bytes(input, size_of::<$ty>())?;
                    Ok(<$ty>::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    };
}

impl_codec_for_int!(u8, u16, u32, u64, i64);

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match read_bytes(input, 1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        write_varint(out, self.len() as u64);
        out.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = read_length(input)?;
        let bytes = read_bytes(input, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidValue)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        write_varint(out, self.len() as u64);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = read_length(input)?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(T::decode(input)?);
        }
        Ok(items)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => out.write(&[0]),
            Some(value) => {
                out.write(&[1]);
                value.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match read_bytes(input, 1)?[0] {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(self);
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, N)?;
        Ok(bytes.try_into().unwrap())
    }
}

/// Serializes a signed big integer as its unsigned little-endian magnitude
/// with the sign carried in the highest bit of the highest byte.
///
/// Zero encodes as the empty byte string. A magnitude whose top bit is
/// already set gains one zero byte so the flag never collides with data.
pub fn bigint_to_flagged_le(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    let mut bytes = value.magnitude().to_bytes_le();
    if bytes.last().is_some_and(|&b| b & 0x80 != 0) {
        bytes.push(0);
    }
    if value.sign() == Sign::Minus {
        let last = bytes.len() - 1;
        bytes[last] |= 0x80;
    }
    bytes
}

/// Inverse of [`bigint_to_flagged_le`]. The empty byte string is zero.
pub fn bigint_from_flagged_le(bytes: &[u8]) -> BigInt {
    if bytes.is_empty() {
        return BigInt::zero();
    }
    let mut magnitude = bytes.to_vec();
    let last = magnitude.len() - 1;
    let negative = magnitude[last] & 0x80 != 0;
    magnitude[last] &= 0x7F;
    let magnitude = BigUint::from_bytes_le(&magnitude);
    if magnitude.is_zero() {
        return BigInt::zero();
    }
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    BigInt::from_biguint(sign, magnitude)
}

impl Encode for BigInt {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        let bytes = bigint_to_flagged_le(self);
        write_varint(out, bytes.len() as u64);
        out.write(&bytes);
    }
}

impl Decode for BigInt {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = read_length(input)?;
        let bytes = read_bytes(input, len)?;
        Ok(bigint_from_flagged_le(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for value in [0u64, 1, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, u64::MAX] {
            let mut out = Vec::new();
            write_varint(&mut out, value);
            let mut input = out.as_slice();
            assert_eq!(read_varint(&mut input).unwrap(), value);
            assert!(input.is_empty());
        }
    }

    #[test]
    fn varint_is_compact() {
        let mut out = Vec::new();
        write_varint(&mut out, 0x42);
        assert_eq!(out, vec![0x42]);

        let mut out = Vec::new();
        write_varint(&mut out, 0x1234);
        assert_eq!(out, vec![0xFD, 0x34, 0x12]);
    }

    #[test]
    fn string_round_trip() {
        let text = String::from("gas contract");
        let decoded = String::from_bytes(&text.to_bytes()).unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let bytes = vec![2u8, 0xFF, 0xFE];
        assert_eq!(String::from_bytes(&bytes), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn option_round_trip() {
        let some: Option<u32> = Some(7);
        let none: Option<u32> = None;
        assert_eq!(Option::<u32>::from_bytes(&some.to_bytes()).unwrap(), some);
        assert_eq!(Option::<u32>::from_bytes(&none.to_bytes()).unwrap(), none);
    }

    #[test]
    fn from_bytes_rejects_trailing_data() {
        let mut bytes = 5u32.to_bytes();
        bytes.push(0);
        assert_eq!(u32::from_bytes(&bytes), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn bigint_zero_is_empty() {
        assert!(bigint_to_flagged_le(&BigInt::zero()).is_empty());
        assert_eq!(bigint_from_flagged_le(&[]), BigInt::zero());
    }

    #[test]
    fn bigint_sign_flag_round_trip() {
        for value in [1i64, -1, 127, 128, -128, 255, -255, 1_000_000, -1_000_000] {
            let big = BigInt::from(value);
            let bytes = bigint_to_flagged_le(&big);
            assert_eq!(bigint_from_flagged_le(&bytes), big, "value {value}");
        }
    }

    #[test]
    fn bigint_high_bit_gets_padding_byte() {
        // 128 = 0x80: the magnitude's top bit is set, so a padding byte keeps
        // the sign flag unambiguous.
        let bytes = bigint_to_flagged_le(&BigInt::from(128));
        assert_eq!(bytes, vec![0x80, 0x00]);
        let bytes = bigint_to_flagged_le(&BigInt::from(-128));
        assert_eq!(bytes, vec![0x80, 0x80]);
    }

    #[test]
    fn bigint_wire_round_trip() {
        let value = BigInt::from(123_456_789_u64) * BigInt::from(987_654_321_u64);
        let decoded = BigInt::from_bytes(&value.to_bytes()).unwrap();
        assert_eq!(decoded, value);
    }
}
