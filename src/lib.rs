//! # Device Session Server
//!
//! Zero-knowledge session rotation for licensed devices. A device proves it
//! knows the identifiers behind a public commitment, and the proof is
//! submitted to a ledger that enforces the session-key precondition.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  DEVICE SESSION SERVER                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/           - Field encoding and domain hashing         │
//! │                                                              │
//! │  proof/          - Halo2 proof system                        │
//! │  ├── identifier.rs - Identifier vectors and commitments     │
//! │  ├── circuit.rs  - Session transition circuit                │
//! │  └── engine.rs   - Compile-once proving engine               │
//! │                                                              │
//! │  ledger/         - Ledger and state store contracts          │
//! │  session/        - Sequencer, lookups, rotation pipeline     │
//! │  network/        - WebSocket server and protocol             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request Flow
//!
//! ```text
//! rotate_session ─► parse identifiers ─► prove ─► sequencer (nonce, sign)
//!                                                    │
//!                                                    ▼
//!                       SessionRecord updated ◄── ledger
//! ```
//!
//! The circuit attests identity only. Whether `currentSessionKey` matches
//! the ledger is checked by the ledger against live state.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod ledger;
pub mod network;
pub mod proof;
pub mod session;

// Re-export commonly used types
pub use config::{ConfigError, ServiceConfig};
pub use error::{ErrorCode, RotationError};
pub use ledger::{InMemoryLedger, LedgerClient, RemoteLedger, SessionStateStore, INITIAL_SESSION_KEY};
pub use proof::{
    commit, DeviceIdentifierVector, IdentifierCommitment, ProvingEngine, SessionProof,
    SessionTransitionClaim, SessionTransitionResult, IDENTIFIER_ARITY,
};
pub use session::{
    SessionQueryService, SessionRotationService, SubmissionSequencer, TransactionOutcome,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
