//! Decimal-string to floating point conversion, preserving precision through
//! `BigDecimal` the way large on-chain integer amounts must be.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use once_cell::sync::Lazy;
use std::str::FromStr;

static POW10_CACHE: Lazy<[BigDecimal; 25]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(BigInt::from(10u32).pow(i as u32))));

fn big_pow10(exp: u8) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from(BigInt::from(10u32).pow(exp as u32))
    }
}

/// Parse a decimal-string minor-unit amount (e.g. `"250000000000"`) into a
/// real number adjusted by `decimals`. Returns `None` if the string does not
/// parse or the adjusted value is not finite and non-negative.
pub fn str_to_f64_with_decimals(value_str: &str, decimals: u8) -> Option<f64> {
    let big_value = BigDecimal::from_str(value_str).ok()?;
    let adjusted = big_value / big_pow10(decimals);
    let result = adjusted.to_f64()?;

    if result.is_finite() && result >= 0.0 {
        Some(result)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_tracked_asset_minor_units() {
        assert_eq!(str_to_f64_with_decimals("250000000000", 9), Some(250.0));
    }

    #[test]
    fn converts_native_minor_units() {
        assert_eq!(str_to_f64_with_decimals("1500000000", 9), Some(1.5));
    }

    #[test]
    fn rejects_unparseable() {
        assert_eq!(str_to_f64_with_decimals("not-a-number", 9), None);
    }

    #[test]
    fn rejects_negative() {
        assert_eq!(str_to_f64_with_decimals("-100", 9), None);
    }

    #[test]
    fn zero_decimals_is_identity() {
        assert_eq!(str_to_f64_with_decimals("42", 0), Some(42.0));
    }
}
