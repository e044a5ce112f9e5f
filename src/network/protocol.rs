//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON objects tagged by `type`.

use serde::{Serialize, Deserialize};
use tracing::warn;

use crate::error::{ErrorCode, RotationError};
use crate::proof::{EngineStatus, IdentifierCommitment};
use crate::session::{RotationReceipt, RotationRequest};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Prove and submit a session rotation.
    RotateSession(SessionRequest),

    /// Build a rotation proof without submitting it.
    ProveSession(SessionRequest),

    /// Look up a device's current session key.
    CurrentSession(LookupRequest),

    /// Report engine and sequencer status.
    Status,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Rotation or proof request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    /// Correlation id, echoed in the reply.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Identifiers and claim.
    #[serde(flatten)]
    pub rotation: RotationRequest,
}

/// Session lookup request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    /// Correlation id, echoed in the reply.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Device to look up.
    pub device_commitment: IdentifierCommitment,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Rotation accepted by the ledger.
    SessionRotated(RotatedInfo),

    /// Proof built, not submitted.
    SessionProof(ProofInfo),

    /// Lookup result.
    CurrentSession(SessionLookup),

    /// Status report.
    Status(ServerStatus),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (unix ms).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Accepted rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatedInfo {
    /// Correlation id.
    pub request_id: String,
    /// Nonce the transaction used.
    pub nonce: u64,
    /// Device commitment.
    pub device_commitment: IdentifierCommitment,
    /// Session key now on the ledger.
    pub new_session_key: u64,
    /// Hex of the serialized proof.
    pub proof: String,
}

impl RotatedInfo {
    /// Build from a receipt.
    ///
    /// The ledger has already applied the rotation, so a proof that fails
    /// to encode is left empty rather than turned into an error.
    pub fn from_receipt(request_id: String, receipt: &RotationReceipt) -> Self {
        Self::with_encoded_proof(request_id, receipt, receipt.proof.to_hex())
    }

    fn with_encoded_proof(
        request_id: String,
        receipt: &RotationReceipt,
        encoded: Result<String, bincode::Error>,
    ) -> Self {
        let proof = encoded.unwrap_or_else(|e| {
            warn!(%request_id, nonce = receipt.nonce, error = %e, "Accepted proof could not be encoded");
            String::new()
        });
        Self {
            request_id,
            nonce: receipt.nonce,
            device_commitment: receipt.device_commitment(),
            new_session_key: receipt.proof.claim.new_session_key,
            proof,
        }
    }
}

/// Unsubmitted proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofInfo {
    /// Correlation id.
    pub request_id: String,
    /// Device commitment.
    pub device_commitment: IdentifierCommitment,
    /// Hex of the serialized proof.
    pub proof: String,
}

/// Lookup result. `current_session` is 0 when `found` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLookup {
    /// Correlation id.
    pub request_id: String,
    /// Current session key.
    pub current_session: u64,
    /// Whether the device has a record.
    pub found: bool,
}

impl SessionLookup {
    /// Build from a query result.
    pub fn new(request_id: String, session: Option<u64>) -> Self {
        Self {
            request_id,
            current_session: session.unwrap_or_default(),
            found: session.is_some(),
        }
    }
}

/// Server status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Proving engine state.
    pub engine: EngineStatus,
    /// Next nonce, absent once exhausted.
    pub next_nonce: Option<u64>,
    /// Submitter public key (hex).
    pub submitter: String,
    /// Identifier arity.
    pub arity: usize,
    /// Server version.
    pub version: String,
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    /// Correlation id, when the request carried one.
    pub request_id: Option<String>,
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Whether the same request may be retried.
    pub retryable: bool,
}

impl ServerError {
    /// Error reply for a pipeline failure.
    pub fn from_rotation(request_id: Option<String>, err: &RotationError) -> Self {
        Self {
            request_id,
            code: err.code(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    /// Error reply for an unparsable frame.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self {
            request_id: None,
            code: ErrorCode::InvalidMessage,
            message: message.into(),
            retryable: false,
        }
    }

    /// Error reply when the server is at capacity.
    pub fn overloaded(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            request_id,
            code: ErrorCode::ServerOverloaded,
            message: message.into(),
            retryable: true,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Correlation id, if the message carries one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientMessage::RotateSession(req) | ClientMessage::ProveSession(req) => req.request_id.as_deref(),
            ClientMessage::CurrentSession(req) => req.request_id.as_deref(),
            ClientMessage::Status | ClientMessage::Ping { .. } => None,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
