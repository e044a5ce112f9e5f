//! Session Layer
//!
//! Everything between a parsed request and the ledger: nonce sequencing,
//! session lookups, and the rotation pipeline that ties them to the
//! proving engine.

pub mod sequencer;
pub mod query;
pub mod service;

pub use sequencer::{SubmissionSequencer, SequencerConfig, TransactionOutcome};
pub use query::SessionQueryService;
pub use service::{SessionRotationService, RotationRequest, RotationReceipt};
