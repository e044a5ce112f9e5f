//! Domain-Separated Hashing
//!
//! SHA-256 helpers used outside the circuit:
//! - Transaction digests that the submitter signs
//! - Reduction of arbitrary raw attribute bytes into field-sized values
//!
//! Order of updates is part of the digest format.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type Digest32 = [u8; 32];

/// Domain separator for signed ledger transactions.
pub const TRANSACTION_DOMAIN: &[u8] = b"DEVICE_SESSION_TX_V1";

/// Domain separator for raw attribute reduction.
pub const ATTRIBUTE_DOMAIN: &[u8] = b"DEVICE_SESSION_ATTR_V1";

/// Incremental hasher with a leading domain separator.
///
/// All integers are written little-endian.
pub struct DomainHasher {
    hasher: Sha256,
}

impl DomainHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for transaction signing payloads.
    pub fn for_transaction() -> Self {
        Self::new(TRANSACTION_DOMAIN)
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a length-prefixed byte string.
    #[inline]
    pub fn update_prefixed(&mut self, bytes: &[u8]) {
        self.update_u64(bytes.len() as u64);
        self.hasher.update(bytes);
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Digest32 {
        self.hasher.finalize().into()
    }
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Digest32 {
    let mut hasher = DomainHasher::new(domain);
    hasher.update_bytes(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hasher_determinism() {
        let make = || {
            let mut h = DomainHasher::for_transaction();
            h.update_u64(7);
            h.update_prefixed(b"proof");
            h.finalize()
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn test_hash_order_matters() {
        let a = {
            let mut h = DomainHasher::new(b"test");
            h.update_u64(1);
            h.update_u64(2);
            h.finalize()
        };
        let b = {
            let mut h = DomainHasher::new(b"test");
            h.update_u64(2);
            h.update_u64(1);
            h.finalize()
        };
        assert_ne!(a, b);
    }

    #[test]
    fn test_domain_separation() {
        let data = [1u8, 2, 3, 4];
        assert_ne!(
            hash_with_domain(TRANSACTION_DOMAIN, &data),
            hash_with_domain(ATTRIBUTE_DOMAIN, &data),
        );
    }

    #[test]
    fn test_length_prefix_disambiguates() {
        let a = {
            let mut h = DomainHasher::new(b"test");
            h.update_prefixed(b"ab");
            h.update_prefixed(b"c");
            h.finalize()
        };
        let b = {
            let mut h = DomainHasher::new(b"test");
            h.update_prefixed(b"a");
            h.update_prefixed(b"bc");
            h.finalize()
        };
        assert_ne!(a, b);
    }
}
