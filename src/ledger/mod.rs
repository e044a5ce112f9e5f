//! Ledger Boundary
//!
//! Contracts for the external ledger (accepts signed session transactions)
//! and the session state store (answers "what is this device's session").
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    LEDGER BOUNDARY                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  mod.rs     - Traits, transaction envelope, records          │
//! │  memory.rs  - In-process ledger (local mode, tests)          │
//! │  remote.rs  - HTTP client for a ledger gateway               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{DomainHasher, Digest32};
use crate::error::RotationError;
use crate::proof::{IdentifierCommitment, SessionProof};

pub use memory::InMemoryLedger;
pub use remote::RemoteLedger;

/// Session key a device holds before its first rotation.
pub const INITIAL_SESSION_KEY: u64 = 0;

/// Ledger-side session record for one device commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Current session key.
    pub session_key: u64,
    /// Set once the device has registered.
    pub exists: bool,
    /// Time of the last accepted rotation.
    pub updated_at: DateTime<Utc>,
}

/// A state-store reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReading {
    /// Session key if the device has a record.
    pub session_key: Option<u64>,
    /// Whether the view reflects the ledger after the last refresh.
    pub fresh: bool,
}

/// Ledger verdict on a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerResponse {
    /// Transaction applied.
    Accepted,
    /// Transaction refused, with reason.
    Rejected(String),
}

/// The ledger could not be reached or did not answer coherently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection or server failure.
    #[error("ledger unreachable: {0}")]
    Unreachable(String),

    /// No answer in time.
    #[error("ledger request timed out")]
    Timeout,

    /// Answer could not be decoded.
    #[error("malformed ledger response: {0}")]
    BadResponse(String),
}

impl From<TransportError> for RotationError {
    fn from(err: TransportError) -> Self {
        RotationError::TransportFailure(err.to_string())
    }
}

/// Signed session transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    /// Proof being submitted.
    pub proof: SessionProof,
    /// Submitter nonce.
    pub nonce: u64,
    /// ed25519 signature over [`transaction_digest`].
    pub signature: Vec<u8>,
    /// Submitter public key.
    pub public_key: [u8; 32],
}

/// Digest a submitter signs: `domain || nonce || bincode(proof)`.
pub fn transaction_digest(nonce: u64, proof: &SessionProof) -> Result<Digest32, bincode::Error> {
    let encoded = proof.to_bytes()?;
    let mut hasher = DomainHasher::for_transaction();
    hasher.update_u64(nonce);
    hasher.update_prefixed(&encoded);
    Ok(hasher.finalize())
}

impl PendingTransaction {
    /// Sign `proof` at `nonce`.
    pub fn sign(proof: SessionProof, nonce: u64, key: &SigningKey) -> Result<Self, bincode::Error> {
        let digest = transaction_digest(nonce, &proof)?;
        let signature = key.sign(&digest);
        Ok(Self {
            proof,
            nonce,
            signature: signature.to_bytes().to_vec(),
            public_key: key.verifying_key().to_bytes(),
        })
    }

    /// Check the signature against the embedded public key.
    pub fn verify_signature(&self) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&self.signature) else {
            return false;
        };
        match transaction_digest(self.nonce, &self.proof) {
            Ok(digest) => key.verify(&digest, &signature).is_ok(),
            Err(_) => false,
        }
    }
}

/// Accepts signed session transactions.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit one transaction and wait for the verdict.
    async fn submit(&self, tx: PendingTransaction) -> Result<LedgerResponse, TransportError>;
}

/// Read side of the ledger's session records.
#[async_trait]
pub trait SessionStateStore: Send + Sync {
    /// Bring the local view up to date for `commitment`.
    async fn refresh(&self, commitment: &IdentifierCommitment) -> Result<(), TransportError>;

    /// Read the session key for `commitment`.
    async fn read(&self, commitment: &IdentifierCommitment) -> Result<StoreReading, TransportError>;
}
