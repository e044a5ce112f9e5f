//! Core primitives.
//!
//! Field encoding and domain-separated hashing shared by the proof,
//! ledger, and network layers.

pub mod field;
pub mod hash;

// Re-export core types
pub use field::{Fp, FIELD_BYTES, field_from_bytes, field_to_bytes, field_from_u64};
pub use hash::{DomainHasher, Digest32, hash_with_domain};
