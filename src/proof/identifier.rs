//! Device Identifier Commitment
//!
//! A device is identified by a fixed-arity vector of raw attributes.
//! The vector never leaves the request that supplied it; only its
//! Poseidon commitment is published.

use std::fmt;

use ff::Field;
use halo2_gadgets::poseidon::primitives::{self as poseidon, ConstantLength, P128Pow5T3};
use serde::{Serialize, Deserialize, Serializer, Deserializer};
use thiserror::Error;

use crate::core::field::{
    Fp, FIELD_BYTES, field_from_bytes, field_to_bytes, field_from_u64,
    parse_hex32, reduce_attribute_bytes,
};
use crate::error::RotationError;

/// Default number of attributes in a device fingerprint
/// (cpu id, system serial, system uuid, baseboard serial, mac, disk serial).
pub const IDENTIFIER_ARITY: usize = 6;

/// Poseidon sponge width.
pub const POSEIDON_WIDTH: usize = 3;

/// Poseidon sponge rate.
pub const POSEIDON_RATE: usize = 2;

/// Errors produced while parsing raw identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Wrong number of attributes.
    #[error("expected {expected} identifiers, got {got}")]
    ArityMismatch {
        /// Circuit arity.
        expected: usize,
        /// Supplied count.
        got: usize,
    },

    /// Attribute is not valid 32-byte hex.
    #[error("identifier {index} is not 32-byte hex")]
    InvalidHex {
        /// Position in the vector.
        index: usize,
    },

    /// Attribute encodes a value outside the field.
    #[error("identifier {index} is outside the field domain")]
    OutOfDomain {
        /// Position in the vector.
        index: usize,
    },
}

impl From<IdentifierError> for RotationError {
    fn from(err: IdentifierError) -> Self {
        RotationError::MalformedIdentifierInput(err.to_string())
    }
}

/// Private device attribute vector.
///
/// `Debug` output is redacted; the values are witness data.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentifierVector<const ARITY: usize = IDENTIFIER_ARITY> {
    elements: [Fp; ARITY],
}

impl<const ARITY: usize> DeviceIdentifierVector<ARITY> {
    /// Build from already-reduced field elements.
    pub fn from_elements(elements: [Fp; ARITY]) -> Self {
        Self { elements }
    }

    /// Build from u64 attributes.
    pub fn from_u64s(values: [u64; ARITY]) -> Self {
        Self { elements: values.map(field_from_u64) }
    }

    /// Parse 32-byte canonical encodings, checking arity and domain.
    pub fn from_raw(raw: &[[u8; FIELD_BYTES]]) -> Result<Self, IdentifierError> {
        if raw.len() != ARITY {
            return Err(IdentifierError::ArityMismatch { expected: ARITY, got: raw.len() });
        }

        let mut elements = [Fp::ZERO; ARITY];
        for (index, bytes) in raw.iter().enumerate() {
            elements[index] = field_from_bytes(bytes)
                .ok_or(IdentifierError::OutOfDomain { index })?;
        }
        Ok(Self { elements })
    }

    /// Parse hex-encoded attributes as received on the wire.
    pub fn from_hex<S: AsRef<str>>(raw: &[S]) -> Result<Self, IdentifierError> {
        if raw.len() != ARITY {
            return Err(IdentifierError::ArityMismatch { expected: ARITY, got: raw.len() });
        }

        let decoded = raw.iter()
            .enumerate()
            .map(|(index, s)| parse_hex32(s.as_ref()).ok_or(IdentifierError::InvalidHex { index }))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_raw(&decoded)
    }

    /// Build from arbitrary attribute byte strings (serial numbers, MACs).
    pub fn from_attribute_bytes<B: AsRef<[u8]>>(raw: &[B]) -> Result<Self, IdentifierError> {
        let reduced: Vec<[u8; FIELD_BYTES]> = raw.iter()
            .map(|b| reduce_attribute_bytes(b.as_ref()))
            .collect();
        Self::from_raw(&reduced)
    }

    /// Field elements (circuit witness).
    pub fn elements(&self) -> &[Fp; ARITY] {
        &self.elements
    }

    /// Wire encoding of each attribute.
    pub fn to_hex(&self) -> Vec<String> {
        self.elements.iter().map(|e| hex::encode(field_to_bytes(e))).collect()
    }
}

impl<const ARITY: usize> fmt::Debug for DeviceIdentifierVector<ARITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceIdentifierVector([redacted; {}])", ARITY)
    }
}

/// Commitment to a device identifier vector.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentifierCommitment([u8; FIELD_BYTES]);

impl IdentifierCommitment {
    /// Wrap a field element.
    pub fn from_field(value: Fp) -> Self {
        Self(field_to_bytes(&value))
    }

    /// Parse a canonical encoding.
    pub fn from_bytes(bytes: [u8; FIELD_BYTES]) -> Option<Self> {
        field_from_bytes(&bytes).map(Self::from_field)
    }

    /// Parse a hex string (optionally `0x`-prefixed).
    pub fn from_hex(s: &str) -> Option<Self> {
        parse_hex32(s).and_then(Self::from_bytes)
    }

    /// Field value.
    pub fn to_field(&self) -> Fp {
        // Constructors only admit canonical encodings.
        field_from_bytes(&self.0).unwrap_or(Fp::ZERO)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; FIELD_BYTES] {
        &self.0
    }

    /// Hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for IdentifierCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentifierCommitment({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for IdentifierCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for IdentifierCommitment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for IdentifierCommitment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom("commitment must be a canonical 32-byte hex field element"))
    }
}

/// Poseidon hash of the identifier vector.
///
/// Uses the same permutation and domain as the in-circuit gadget.
pub fn commit<const ARITY: usize>(vector: &DeviceIdentifierVector<ARITY>) -> IdentifierCommitment {
    let digest = poseidon::Hash::<Fp, P128Pow5T3, ConstantLength<ARITY>, POSEIDON_WIDTH, POSEIDON_RATE>::init()
        .hash(vector.elements);
    IdentifierCommitment::from_field(digest)
}

/// Parse and commit in one step.
pub fn commit_raw<const ARITY: usize>(
    raw: &[[u8; FIELD_BYTES]],
) -> Result<IdentifierCommitment, IdentifierError> {
    DeviceIdentifierVector::<ARITY>::from_raw(raw).map(|v| commit(&v))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::u64_to_field_bytes;
    use proptest::prelude::*;

    #[test]
    fn test_commit_determinism() {
        let v = DeviceIdentifierVector::<IDENTIFIER_ARITY>::from_u64s([1, 2, 3, 4, 5, 6]);
        assert_eq!(commit(&v), commit(&v.clone()));
    }

    #[test]
    fn test_order_matters() {
        let a = DeviceIdentifierVector::<3>::from_u64s([1, 2, 3]);
        let b = DeviceIdentifierVector::<3>::from_u64s([3, 2, 1]);
        assert_ne!(commit(&a), commit(&b));
    }

    #[test]
    fn test_arity_mismatch() {
        let raw = vec![u64_to_field_bytes(1); 5];
        let err = DeviceIdentifierVector::<IDENTIFIER_ARITY>::from_raw(&raw).unwrap_err();
        assert_eq!(err, IdentifierError::ArityMismatch { expected: 6, got: 5 });

        let rotation: RotationError = err.into();
        assert!(matches!(rotation, RotationError::MalformedIdentifierInput(_)));
    }

    #[test]
    fn test_out_of_domain_element() {
        let mut raw = vec![u64_to_field_bytes(1); 3];
        raw[2] = [0xff; 32];
        let err = DeviceIdentifierVector::<3>::from_raw(&raw).unwrap_err();
        assert_eq!(err, IdentifierError::OutOfDomain { index: 2 });
    }

    #[test]
    fn test_invalid_hex() {
        let raw = ["00".repeat(32), "not-hex".to_string(), "00".repeat(32)];
        let err = DeviceIdentifierVector::<3>::from_hex(&raw).unwrap_err();
        assert_eq!(err, IdentifierError::InvalidHex { index: 1 });
    }

    #[test]
    fn test_hex_roundtrip_matches_commitment() {
        let v = DeviceIdentifierVector::<3>::from_u64s([11, 22, 33]);
        let parsed = DeviceIdentifierVector::<3>::from_hex(&v.to_hex()).unwrap();
        assert_eq!(commit(&v), commit(&parsed));
    }

    #[test]
    fn test_attribute_bytes() {
        let attrs = ["BFEBFBFF000906EA", "C02XK0AAJG5H", "4C4C4544-0047", "PF2MXL1C", "00:1B:44:11:3A:B7", "S4EVNX0N"];
        let a = DeviceIdentifierVector::<IDENTIFIER_ARITY>::from_attribute_bytes(&attrs).unwrap();
        let b = DeviceIdentifierVector::<IDENTIFIER_ARITY>::from_attribute_bytes(&attrs).unwrap();
        assert_eq!(commit(&a), commit(&b));
    }

    #[test]
    fn test_debug_is_redacted() {
        let v = DeviceIdentifierVector::<3>::from_u64s([123456789, 2, 3]);
        let printed = format!("{:?}", v);
        assert!(!printed.contains("123456789"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_commitment_serde() {
        let c = commit(&DeviceIdentifierVector::<3>::from_u64s([1, 2, 3]));
        let json = serde_json::to_string(&c).unwrap();
        let parsed: IdentifierCommitment = serde_json::from_str(&json).unwrap();
        assert_eq!(c, parsed);

        let bad = format!("\"{}\"", "ff".repeat(32));
        assert!(serde_json::from_str::<IdentifierCommitment>(&bad).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_distinct_vectors_distinct_commitments(
            a in prop::array::uniform6(any::<u64>()),
            b in prop::array::uniform6(any::<u64>()),
        ) {
            prop_assume!(a != b);
            let ca = commit(&DeviceIdentifierVector::<IDENTIFIER_ARITY>::from_u64s(a));
            let cb = commit(&DeviceIdentifierVector::<IDENTIFIER_ARITY>::from_u64s(b));
            prop_assert_ne!(ca, cb);
        }

        #[test]
        fn prop_commit_is_deterministic(a in prop::array::uniform6(any::<u64>())) {
            let v = DeviceIdentifierVector::<IDENTIFIER_ARITY>::from_u64s(a);
            prop_assert_eq!(commit(&v), commit(&v));
        }
    }
}
