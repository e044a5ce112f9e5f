//! In-process ledger.
//!
//! Applies the same acceptance rules an external ledger does:
//! signature, nonce, proof, then the session precondition. Used when no
//! ledger gateway is configured, and by tests.
//!
//! Proofs are verified on the blocking pool before the state lock is taken.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    LedgerClient, LedgerResponse, PendingTransaction, SessionRecord, SessionStateStore,
    StoreReading, TransportError, INITIAL_SESSION_KEY,
};
use crate::proof::{IdentifierCommitment, SessionProof, SessionVerifier};

#[derive(Default)]
struct LedgerState {
    /// Next expected nonce per authorised submitter; `None` once exhausted.
    next_nonce: BTreeMap<[u8; 32], Option<u64>>,
    /// Session records by device commitment.
    records: BTreeMap<IdentifierCommitment, SessionRecord>,
    /// Commitments refreshed since their last write.
    refreshed: BTreeSet<IdentifierCommitment>,
    /// Nonces of accepted transactions, in acceptance order.
    accepted_nonces: Vec<u64>,
    /// Submissions left to fail with a transport error.
    fail_next: u32,
}

/// Ledger held in memory.
pub struct InMemoryLedger {
    verifier: SessionVerifier,
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    /// Create a ledger that verifies proofs with `verifier`.
    pub fn new(verifier: SessionVerifier) -> Self {
        Self {
            verifier,
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Allow `public_key` to submit, expecting `start_nonce` first.
    pub async fn authorize(&self, public_key: [u8; 32], start_nonce: u64) {
        let mut state = self.state.write().await;
        state.next_nonce.insert(public_key, Some(start_nonce));
        info!(submitter = %hex::encode(&public_key[..8]), start_nonce, "Authorised submitter");
    }

    /// Make the next `n` submissions fail as if the ledger were unreachable.
    pub async fn fail_next_submissions(&self, n: u32) {
        self.state.write().await.fail_next = n;
    }

    /// Record for `commitment`, if any.
    pub async fn record(&self, commitment: &IdentifierCommitment) -> Option<SessionRecord> {
        self.state.read().await.records.get(commitment).cloned()
    }

    /// Nonces accepted so far, in order.
    pub async fn accepted_nonces(&self) -> Vec<u64> {
        self.state.read().await.accepted_nonces.clone()
    }

    /// Next nonce expected from `public_key`.
    pub async fn expected_nonce(&self, public_key: &[u8; 32]) -> Option<u64> {
        self.state.read().await.next_nonce.get(public_key).copied().flatten()
    }

    /// Verify `proof` off the async workers.
    async fn verify_proof(&self, proof: &SessionProof) -> Result<Result<(), String>, TransportError> {
        let verifier = self.verifier.clone();
        let proof = proof.clone();
        tokio::task::spawn_blocking(move || {
            verifier.verify(&proof).map_err(|e| format!("invalid proof: {}", e))
        })
        .await
        .map_err(|e| TransportError::Unreachable(format!("verification task failed: {}", e)))
    }

    /// Session precondition against current state.
    fn check_precondition(state: &LedgerState, proof: &SessionProof) -> Result<(), String> {
        let claim = &proof.claim;
        match state.records.get(&proof.result.identifier_commitment) {
            None if claim.current_session_key != INITIAL_SESSION_KEY => Err(format!(
                "device not registered; first rotation must start from {}",
                INITIAL_SESSION_KEY
            )),
            Some(record) if record.session_key != claim.current_session_key => Err(format!(
                "stale session key: ledger holds {}, claim holds {}",
                record.session_key, claim.current_session_key
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit(&self, tx: PendingTransaction) -> Result<LedgerResponse, TransportError> {
        {
            let mut state = self.state.write().await;
            if state.fail_next > 0 {
                state.fail_next -= 1;
                warn!(nonce = tx.nonce, "Simulated ledger outage");
                return Err(TransportError::Unreachable("simulated outage".into()));
            }
        }

        if !tx.verify_signature() {
            return Ok(LedgerResponse::Rejected("invalid signature".into()));
        }

        // Verified without the state lock held; applied after the nonce checks.
        let verdict = self.verify_proof(&tx.proof).await?;

        let mut state = self.state.write().await;
        let expected = match state.next_nonce.get(&tx.public_key).copied() {
            None => return Ok(LedgerResponse::Rejected("unknown submitter".into())),
            Some(None) => return Ok(LedgerResponse::Rejected("nonce space exhausted".into())),
            Some(Some(expected)) => expected,
        };
        if tx.nonce != expected {
            return Ok(LedgerResponse::Rejected(format!(
                "nonce {} does not match expected {}",
                tx.nonce, expected
            )));
        }

        // Nonce is consumed from here on, whatever the verdict.
        state.next_nonce.insert(tx.public_key, expected.checked_add(1));

        if let Err(reason) = verdict.and_then(|()| Self::check_precondition(&state, &tx.proof)) {
            debug!(nonce = tx.nonce, %reason, "Transaction rejected");
            return Ok(LedgerResponse::Rejected(reason));
        }

        let commitment = tx.proof.result.identifier_commitment;
        state.records.insert(commitment, SessionRecord {
            session_key: tx.proof.claim.new_session_key,
            exists: true,
            updated_at: Utc::now(),
        });
        state.refreshed.remove(&commitment);
        state.accepted_nonces.push(tx.nonce);

        debug!(
            nonce = tx.nonce,
            device = %commitment,
            session_key = tx.proof.claim.new_session_key,
            "Transaction accepted"
        );
        Ok(LedgerResponse::Accepted)
    }
}

#[async_trait]
impl SessionStateStore for InMemoryLedger {
    async fn refresh(&self, commitment: &IdentifierCommitment) -> Result<(), TransportError> {
        self.state.write().await.refreshed.insert(*commitment);
        Ok(())
    }

    async fn read(&self, commitment: &IdentifierCommitment) -> Result<StoreReading, TransportError> {
        let state = self.state.read().await;
        Ok(StoreReading {
            session_key: state.records.get(commitment).map(|r| r.session_key),
            fresh: state.refreshed.contains(commitment),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
