//! Type conversion and formatting utilities.
//!
//! Token amounts are 256-bit unsigned on the wire and signed arbitrary-precision
//! in the ledger, persisted as base-10 strings. All arithmetic happens on
//! `BigInt`; strings exist only at the store boundary.

use alloy::primitives::{hex, U256};
use anyhow::{anyhow, Result};
use num_bigint::{BigInt, Sign};
use std::str::FromStr;

// ============================================
// Hex Encoding
// ============================================

/// Encode bytes as a lowercase hex string with 0x prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

// ============================================
// Big Integer Conversions
// ============================================

/// Widen an alloy U256 into a signed BigInt.
pub fn u256_to_bigint(value: U256) -> BigInt {
    let bytes: [u8; 32] = value.to_le_bytes();
    BigInt::from_bytes_le(Sign::Plus, &bytes)
}

/// Parse a base-10 string amount from the store.
pub fn parse_bigint(value: &str) -> Result<BigInt> {
    BigInt::from_str(value).map_err(|_| anyhow!("invalid integer string: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_encode_prefixes_and_lowercases() {
        assert_eq!(hex_encode(&[0xAB, 0xCD]), "0xabcd");
        assert_eq!(hex_encode(&[]), "0x");
    }

    #[test]
    fn test_u256_to_bigint_roundtrip() {
        let value = U256::from(1_000_000_000_000_000_000u128);
        assert_eq!(u256_to_bigint(value).to_string(), "1000000000000000000");
    }

    #[test]
    fn test_u256_to_bigint_max() {
        let big = u256_to_bigint(U256::MAX);
        let expected = (BigInt::from(1) << 256) - 1;
        assert_eq!(big, expected);
    }

    #[test]
    fn test_parse_bigint_signed() {
        assert_eq!(parse_bigint("-400").unwrap(), BigInt::from(-400));
        assert_eq!(parse_bigint("0").unwrap(), BigInt::from(0));
        assert!(parse_bigint("not-a-number").is_err());
        assert!(parse_bigint("").is_err());
    }
}
