//! Field Element Encoding
//!
//! Conversions between wire values and the Pallas base field used by the
//! session circuit. Every field element crosses the wire as its canonical
//! 32-byte little-endian representation.

use ff::PrimeField;
use pasta_curves::pallas;

use super::hash::{hash_with_domain, ATTRIBUTE_DOMAIN};

/// Circuit field (Pallas base field, scalar field of Vesta).
pub type Fp = pallas::Base;

/// Encoded field element width in bytes.
pub const FIELD_BYTES: usize = 32;

/// Decode a canonical little-endian field encoding.
///
/// Returns `None` when the bytes encode a value >= the field modulus.
pub fn field_from_bytes(bytes: &[u8; FIELD_BYTES]) -> Option<Fp> {
    Option::from(Fp::from_repr(*bytes))
}

/// Encode a field element as canonical little-endian bytes.
#[inline]
pub fn field_to_bytes(value: &Fp) -> [u8; FIELD_BYTES] {
    value.to_repr()
}

/// Embed a u64 into the field.
#[inline]
pub fn field_from_u64(value: u64) -> Fp {
    Fp::from(value)
}

/// Encoding of a u64 as a 32-byte raw attribute.
pub fn u64_to_field_bytes(value: u64) -> [u8; FIELD_BYTES] {
    let mut out = [0u8; FIELD_BYTES];
    out[..8].copy_from_slice(&value.to_le_bytes());
    out
}

/// Reduce arbitrary attribute bytes (serials, MAC strings) to a canonical
/// field encoding.
///
/// The top two bits of the SHA-256 digest are cleared, which places the
/// value below 2^254 and therefore below the Pallas modulus.
pub fn reduce_attribute_bytes(data: &[u8]) -> [u8; FIELD_BYTES] {
    let mut digest = hash_with_domain(ATTRIBUTE_DOMAIN, data);
    digest[FIELD_BYTES - 1] &= 0x3f;
    digest
}

/// Parse a hex string (optionally `0x`-prefixed) into 32 bytes.
pub fn parse_hex32(s: &str) -> Option<[u8; FIELD_BYTES]> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_encoding_roundtrip() {
        let bytes = u64_to_field_bytes(0xdead_beef);
        let fp = field_from_bytes(&bytes).unwrap();
        assert_eq!(fp, field_from_u64(0xdead_beef));
        assert_eq!(field_to_bytes(&fp), bytes);
    }

    #[test]
    fn test_non_canonical_rejected() {
        assert!(field_from_bytes(&[0xff; 32]).is_none());
    }

    #[test]
    fn test_reduced_attribute_is_canonical() {
        for input in [&b""[..], b"C02XK0AAJG5H", b"00:1B:44:11:3A:B7"] {
            let bytes = reduce_attribute_bytes(input);
            assert!(field_from_bytes(&bytes).is_some());
        }
    }

    #[test]
    fn test_parse_hex32() {
        let hex_str = format!("0x{}", "11".repeat(32));
        assert_eq!(parse_hex32(&hex_str), Some([0x11; 32]));
        assert!(parse_hex32("abcd").is_none());
        assert!(parse_hex32("zz").is_none());
    }
}
