//! Session Proof System
//!
//! Proves that a requester knows the device identifiers behind a public
//! commitment, bound to a claimed session transition.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    PROOF SYSTEM                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  identifier.rs    - Identifier vectors + Poseidon commitment │
//! │  public_inputs.rs - Claim/result and instance column layout  │
//! │  circuit.rs       - Halo2 session transition circuit         │
//! │  engine.rs        - Compile-once proving engine              │
//! │  artifact.rs      - Self-contained proof artifact            │
//! │  verify.rs        - Verification against the verifying key  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod identifier;
pub mod public_inputs;
pub mod circuit;
pub mod engine;
pub mod artifact;
pub mod verify;

// Re-export key types
pub use identifier::{
    commit, commit_raw, DeviceIdentifierVector, IdentifierCommitment, IdentifierError,
    IDENTIFIER_ARITY,
};
pub use public_inputs::{SessionTransitionClaim, SessionTransitionResult, instance_values};
pub use circuit::SessionTransitionCircuit;
pub use engine::{CompiledCircuit, EngineState, EngineStatus, ProverError, ProvingEngine};
pub use artifact::SessionProof;
pub use verify::{SessionVerifier, VerificationError};
