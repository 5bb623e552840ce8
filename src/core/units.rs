//! Decimal normalization for token amounts.
//!
//! Token amounts are integers scaled by the token's decimal count; moving a
//! quantity between tokens with different decimals rescales it here. All
//! math is arbitrary-precision; division truncates toward zero.

use num_bigint::BigInt;
use num_traits::One;

/// `10^exp` as a big integer.
pub fn ten_pow(exp: u32) -> BigInt {
    let mut value = BigInt::one();
    for _ in 0..exp {
        value = value * BigInt::from(10u32);
    }
    value
}

/// Rescales `value` from `from` decimals to `to` decimals.
pub fn convert_decimals(value: &BigInt, from: u32, to: u32) -> BigInt {
    if from == to {
        value.clone()
    } else if to > from {
        value * ten_pow(to - from)
    } else {
        value / ten_pow(from - to)
    }
}

/// Converts a host-provided decimal quantity into the integer representation
/// with the given number of decimals.
pub fn to_big_int(value: f64, decimals: u32) -> BigInt {
    let scale = 10f64.powi(decimals as i32);
    BigInt::from((value * scale).round() as i128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_pow_small_values() {
        assert_eq!(ten_pow(0), BigInt::from(1));
        assert_eq!(ten_pow(3), BigInt::from(1000));
    }

    #[test]
    fn widening_multiplies() {
        assert_eq!(
            convert_decimals(&BigInt::from(5), 2, 8),
            BigInt::from(5_000_000)
        );
    }

    #[test]
    fn narrowing_truncates_toward_zero() {
        assert_eq!(convert_decimals(&BigInt::from(199), 2, 0), BigInt::from(1));
        assert_eq!(convert_decimals(&BigInt::from(-199), 2, 0), BigInt::from(-1));
    }

    #[test]
    fn same_scale_is_identity() {
        let value = BigInt::from(12345);
        assert_eq!(convert_decimals(&value, 4, 4), value);
    }

    #[test]
    fn to_big_int_scales_and_rounds() {
        assert_eq!(to_big_int(1.5, 8), BigInt::from(150_000_000));
        assert_eq!(to_big_int(0.000_000_01, 8), BigInt::from(1));
    }
}
