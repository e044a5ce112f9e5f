//! Submission Sequencer
//!
//! Single owner of the submitter nonce. Submissions enter a bounded FIFO;
//! one actor task assigns nonces, signs, and dispatches in queue order,
//! so nonce order and ledger arrival order always agree.
//!
//! ```text
//!  submit() ─┐
//!  submit() ─┼─► mpsc (FIFO) ─► actor: nonce → sign → ledger ─► oneshot reply
//!  submit() ─┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::RotationError;
use crate::ledger::{LedgerClient, LedgerResponse, PendingTransaction};
use crate::proof::SessionProof;

/// Sequencer settings.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Maximum queued submissions.
    pub queue_depth: usize,
    /// Time allowed for one ledger round-trip.
    pub submit_timeout: Duration,
    /// First nonce to assign.
    pub start_nonce: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            submit_timeout: Duration::from_secs(30),
            start_nonce: 0,
        }
    }
}

/// Terminal outcome of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Ledger applied the transaction.
    Accepted {
        /// Nonce consumed.
        nonce: u64,
    },
    /// Ledger refused the transaction. The nonce is consumed.
    RejectedByLedger {
        /// Nonce consumed.
        nonce: u64,
        /// Ledger's reason.
        reason: String,
    },
    /// No verdict. The nonce was not consumed.
    TransportFailure {
        /// Nonce that was attempted, if one was assigned.
        nonce: Option<u64>,
        /// Failure description.
        reason: String,
    },
    /// The submitter has no nonces left.
    NonceExhausted,
}

impl TransactionOutcome {
    /// Accepted nonce, or the matching error kind.
    pub fn into_result(self) -> Result<u64, RotationError> {
        match self {
            Self::Accepted { nonce } => Ok(nonce),
            Self::RejectedByLedger { reason, .. } => Err(RotationError::RejectedByLedger(reason)),
            Self::TransportFailure { reason, .. } => Err(RotationError::TransportFailure(reason)),
            Self::NonceExhausted => Err(RotationError::NonceExhausted),
        }
    }
}

struct Submission {
    proof: SessionProof,
    reply: oneshot::Sender<TransactionOutcome>,
}

/// Counter shared with handles for reporting only. The actor is its
/// only writer.
#[derive(Default)]
struct NonceView {
    next: AtomicU64,
    exhausted: AtomicBool,
}

/// Handle to the sequencer actor. Cheap to clone.
#[derive(Clone)]
pub struct SubmissionSequencer {
    queue: mpsc::Sender<Submission>,
    view: Arc<NonceView>,
    public_key: [u8; 32],
}

impl SubmissionSequencer {
    /// Spawn the actor. Must be called from within a Tokio runtime.
    pub fn spawn(ledger: Arc<dyn LedgerClient>, key: SigningKey, config: SequencerConfig) -> Self {
        let (queue, rx) = mpsc::channel(config.queue_depth.max(1));
        let view = Arc::new(NonceView::default());
        view.next.store(config.start_nonce, Ordering::SeqCst);
        let public_key = key.verifying_key().to_bytes();

        info!(
            submitter = %hex::encode(&public_key[..8]),
            start_nonce = config.start_nonce,
            queue_depth = config.queue_depth,
            "Submission sequencer started"
        );

        let actor = SequencerActor {
            ledger,
            key,
            next_nonce: Some(config.start_nonce),
            submit_timeout: config.submit_timeout,
            view: view.clone(),
        };
        tokio::spawn(actor.run(rx));

        Self { queue, view, public_key }
    }

    /// Queue `proof` for submission and wait for its outcome.
    pub async fn submit(&self, proof: SessionProof) -> TransactionOutcome {
        let (reply, outcome) = oneshot::channel();
        if self.queue.send(Submission { proof, reply }).await.is_err() {
            return TransactionOutcome::TransportFailure {
                nonce: None,
                reason: "sequencer stopped".into(),
            };
        }

        outcome.await.unwrap_or_else(|_| TransactionOutcome::TransportFailure {
            nonce: None,
            reason: "sequencer dropped submission".into(),
        })
    }

    /// Nonce the next submission will use, or `None` once exhausted.
    pub fn next_nonce(&self) -> Option<u64> {
        if self.view.exhausted.load(Ordering::SeqCst) {
            None
        } else {
            Some(self.view.next.load(Ordering::SeqCst))
        }
    }

    /// Submitter public key.
    pub fn public_key(&self) -> [u8; 32] {
        self.public_key
    }
}

struct SequencerActor {
    ledger: Arc<dyn LedgerClient>,
    key: SigningKey,
    /// `None` once the nonce space is exhausted.
    next_nonce: Option<u64>,
    submit_timeout: Duration,
    view: Arc<NonceView>,
}

impl SequencerActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Submission>) {
        while let Some(submission) = rx.recv().await {
            let outcome = self.dispatch(submission.proof).await;
            // Caller may have gone away; the outcome still stands.
            let _ = submission.reply.send(outcome);
        }
        debug!("Submission sequencer stopped");
    }

    async fn dispatch(&mut self, proof: SessionProof) -> TransactionOutcome {
        let Some(nonce) = self.next_nonce else {
            warn!("Submission refused: nonce space exhausted");
            return TransactionOutcome::NonceExhausted;
        };

        let tx = match PendingTransaction::sign(proof, nonce, &self.key) {
            Ok(tx) => tx,
            Err(e) => {
                error!(nonce, error = %e, "Failed to encode transaction");
                return TransactionOutcome::TransportFailure {
                    nonce: Some(nonce),
                    reason: format!("encoding: {}", e),
                };
            }
        };

        debug!(nonce, game_id = tx.proof.claim.game_id, "Dispatching transaction");

        let outcome = match tokio::time::timeout(self.submit_timeout, self.ledger.submit(tx)).await {
            Err(_) => {
                warn!(nonce, timeout_ms = self.submit_timeout.as_millis() as u64, "Ledger submission timed out");
                return TransactionOutcome::TransportFailure {
                    nonce: Some(nonce),
                    reason: "ledger submission timed out".into(),
                };
            }
            Ok(Err(e)) => {
                warn!(nonce, error = %e, "Ledger unreachable");
                return TransactionOutcome::TransportFailure {
                    nonce: Some(nonce),
                    reason: e.to_string(),
                };
            }
            Ok(Ok(LedgerResponse::Accepted)) => {
                info!(nonce, "Transaction accepted");
                TransactionOutcome::Accepted { nonce }
            }
            Ok(Ok(LedgerResponse::Rejected(reason))) => {
                info!(nonce, %reason, "Transaction rejected");
                TransactionOutcome::RejectedByLedger { nonce, reason }
            }
        };

        self.advance(nonce);
        outcome
    }

    fn advance(&mut self, used: u64) {
        self.next_nonce = used.checked_add(1);
        match self.next_nonce {
            Some(next) => self.view.next.store(next, Ordering::SeqCst),
            None => {
                error!(last_nonce = used, "Nonce space exhausted; halting submissions");
                self.view.exhausted.store(true, Ordering::SeqCst);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use crate::ledger::TransportError;
    use crate::proof::{commit, DeviceIdentifierVector, SessionTransitionClaim, SessionTransitionResult};

    /// Ledger that records arrival order and answers from a script.
    #[derive(Default)]
    struct ScriptedLedger {
        seen: Mutex<Vec<u64>>,
        script: Mutex<Vec<Result<LedgerResponse, TransportError>>>,
        delay: Option<Duration>,
    }

    impl ScriptedLedger {
        fn with_script(script: Vec<Result<LedgerResponse, TransportError>>) -> Self {
            Self { script: Mutex::new(script), ..Default::default() }
        }
    }

    #[async_trait]
    impl LedgerClient for ScriptedLedger {
        async fn submit(&self, tx: PendingTransaction) -> Result<LedgerResponse, TransportError> {
            assert!(tx.verify_signature());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.seen.lock().await.push(tx.nonce);
            let mut script = self.script.lock().await;
            if script.is_empty() {
                Ok(LedgerResponse::Accepted)
            } else {
                script.remove(0)
            }
        }
    }

    fn proof(new_key: u64) -> SessionProof {
        let claim = SessionTransitionClaim::new(7, 0, new_key);
        let commitment = commit(&DeviceIdentifierVector::<3>::from_u64s([1, 2, 3]));
        SessionProof {
            claim,
            result: SessionTransitionResult::for_claim(&claim, commitment),
            bytes: vec![0; 16],
        }
    }

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[tokio::test]
    async fn test_nonces_increase() {
        let ledger = Arc::new(ScriptedLedger::default());
        let sequencer = SubmissionSequencer::spawn(ledger.clone(), key(), SequencerConfig::default());

        assert_eq!(sequencer.submit(proof(1)).await, TransactionOutcome::Accepted { nonce: 0 });
        assert_eq!(sequencer.submit(proof(2)).await, TransactionOutcome::Accepted { nonce: 1 });
        assert_eq!(sequencer.next_nonce(), Some(2));
        assert_eq!(*ledger.seen.lock().await, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_get_distinct_nonces() {
        let ledger = Arc::new(ScriptedLedger::default());
        let sequencer = SubmissionSequencer::spawn(ledger.clone(), key(), SequencerConfig::default());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let sequencer = sequencer.clone();
                tokio::spawn(async move { sequencer.submit(proof(i + 1)).await })
            })
            .collect();

        let mut nonces = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                TransactionOutcome::Accepted { nonce } => nonces.push(nonce),
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        nonces.sort_unstable();
        assert_eq!(nonces, (0..16).collect::<Vec<_>>());
        // Arrival order at the ledger is assignment order
        assert_eq!(*ledger.seen.lock().await, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_nonce() {
        let ledger = Arc::new(ScriptedLedger::with_script(vec![
            Err(TransportError::Unreachable("down".into())),
        ]));
        let sequencer = SubmissionSequencer::spawn(ledger.clone(), key(), SequencerConfig::default());

        let first = sequencer.submit(proof(1)).await;
        assert!(matches!(first, TransactionOutcome::TransportFailure { nonce: Some(0), .. }));
        assert_eq!(sequencer.next_nonce(), Some(0));

        assert_eq!(sequencer.submit(proof(1)).await, TransactionOutcome::Accepted { nonce: 0 });
        assert_eq!(*ledger.seen.lock().await, vec![0, 0]);
    }

    #[tokio::test]
    async fn test_rejection_consumes_nonce() {
        let ledger = Arc::new(ScriptedLedger::with_script(vec![
            Ok(LedgerResponse::Rejected("stale session key".into())),
        ]));
        let sequencer = SubmissionSequencer::spawn(ledger, key(), SequencerConfig::default());

        let outcome = sequencer.submit(proof(1)).await;
        assert_eq!(outcome, TransactionOutcome::RejectedByLedger {
            nonce: 0,
            reason: "stale session key".into(),
        });
        assert_eq!(sequencer.next_nonce(), Some(1));
        assert!(matches!(outcome.into_result(), Err(RotationError::RejectedByLedger(_))));
    }

    #[tokio::test]
    async fn test_timeout_is_transport_failure() {
        let ledger = Arc::new(ScriptedLedger {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let config = SequencerConfig {
            submit_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let sequencer = SubmissionSequencer::spawn(ledger, key(), config);

        let outcome = sequencer.submit(proof(1)).await;
        assert!(matches!(outcome, TransactionOutcome::TransportFailure { nonce: Some(0), .. }));
        assert!(outcome.into_result().unwrap_err().is_retryable());
        assert_eq!(sequencer.next_nonce(), Some(0));
    }

    #[tokio::test]
    async fn test_exhaustion_is_fatal() {
        let ledger = Arc::new(ScriptedLedger::default());
        let config = SequencerConfig { start_nonce: u64::MAX, ..Default::default() };
        let sequencer = SubmissionSequencer::spawn(ledger.clone(), key(), config);

        assert_eq!(sequencer.submit(proof(1)).await, TransactionOutcome::Accepted { nonce: u64::MAX });
        assert_eq!(sequencer.next_nonce(), None);

        for _ in 0..3 {
            assert_eq!(sequencer.submit(proof(2)).await, TransactionOutcome::NonceExhausted);
        }
        assert_eq!(ledger.seen.lock().await.len(), 1);
    }
}
