//! Rotation Error Kinds
//!
//! Every failure surfaced to the transport layer is one of these kinds.
//! The split between retryable and permanent kinds is part of the contract.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Errors returned by the session rotation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RotationError {
    /// Proving engine has not finished compiling.
    #[error("proving engine not ready")]
    NotReady,

    /// Identifier vector has the wrong arity or an out-of-domain element.
    #[error("malformed identifier input: {0}")]
    MalformedIdentifierInput(String),

    /// The proof system failed for this input.
    #[error("proof construction failed: {0}")]
    ProofConstructionFailure(String),

    /// Ledger or state store unreachable, or the request timed out.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Ledger verified the submission and refused it.
    #[error("rejected by ledger: {0}")]
    RejectedByLedger(String),

    /// The submitting identity has no nonces left.
    #[error("nonce space exhausted for submitting identity")]
    NonceExhausted,
}

impl RotationError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady | Self::TransportFailure(_))
    }

    /// Wire error code for this kind.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotReady => ErrorCode::NotReady,
            Self::MalformedIdentifierInput(_) => ErrorCode::MalformedIdentifierInput,
            Self::ProofConstructionFailure(_) => ErrorCode::ProofConstructionFailure,
            Self::TransportFailure(_) => ErrorCode::TransportFailure,
            Self::RejectedByLedger(_) => ErrorCode::RejectedByLedger,
            Self::NonceExhausted => ErrorCode::NonceExhausted,
        }
    }
}

/// Error codes carried in server error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Engine still compiling.
    NotReady,
    /// Bad identifier vector.
    MalformedIdentifierInput,
    /// Prover failure.
    ProofConstructionFailure,
    /// Ledger unreachable.
    TransportFailure,
    /// Ledger refused the transaction.
    RejectedByLedger,
    /// Submitter out of nonces.
    NonceExhausted,
    /// Frame could not be parsed.
    InvalidMessage,
    /// Server at connection limit.
    ServerOverloaded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(RotationError::NotReady.is_retryable());
        assert!(RotationError::TransportFailure("timeout".into()).is_retryable());

        assert!(!RotationError::MalformedIdentifierInput("arity".into()).is_retryable());
        assert!(!RotationError::RejectedByLedger("stale".into()).is_retryable());
        assert!(!RotationError::ProofConstructionFailure("synth".into()).is_retryable());
        assert!(!RotationError::NonceExhausted.is_retryable());
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            RotationError::NotReady.code(),
            RotationError::MalformedIdentifierInput(String::new()).code(),
            RotationError::ProofConstructionFailure(String::new()).code(),
            RotationError::TransportFailure(String::new()).code(),
            RotationError::RejectedByLedger(String::new()).code(),
            RotationError::NonceExhausted.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::RejectedByLedger).unwrap();
        assert_eq!(json, "\"rejected_by_ledger\"");
    }
}
