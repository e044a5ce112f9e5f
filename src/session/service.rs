//! Session rotation pipeline: parse → prove → submit.

use serde::{Serialize, Deserialize};
use tracing::{info, instrument};

use crate::error::RotationError;
use crate::proof::{
    DeviceIdentifierVector, IdentifierCommitment, ProvingEngine, SessionProof,
    SessionTransitionClaim, IDENTIFIER_ARITY,
};
use crate::session::query::SessionQueryService;
use crate::session::sequencer::SubmissionSequencer;

/// Inbound rotation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationRequest {
    /// Hex-encoded identifier attributes.
    pub raw_identifiers: Vec<String>,
    /// Game identifier.
    pub game_id: u64,
    /// Session key the device holds now.
    pub current_session_key: u64,
    /// Session key to rotate to.
    pub new_session_key: u64,
}

impl RotationRequest {
    /// Public claim for this request.
    pub fn claim(&self) -> SessionTransitionClaim {
        SessionTransitionClaim::new(self.game_id, self.current_session_key, self.new_session_key)
    }
}

/// Result of an accepted rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReceipt {
    /// Proof the ledger accepted.
    pub proof: SessionProof,
    /// Nonce it was submitted under.
    pub nonce: u64,
}

impl RotationReceipt {
    /// Device the rotation applies to.
    pub fn device_commitment(&self) -> IdentifierCommitment {
        self.proof.result.identifier_commitment
    }
}

/// Wires the proving engine, sequencer, and query service together.
#[derive(Clone)]
pub struct SessionRotationService<const ARITY: usize = IDENTIFIER_ARITY> {
    engine: ProvingEngine<ARITY>,
    sequencer: SubmissionSequencer,
    query: SessionQueryService,
}

impl<const ARITY: usize> SessionRotationService<ARITY> {
    /// Create the pipeline.
    pub fn new(
        engine: ProvingEngine<ARITY>,
        sequencer: SubmissionSequencer,
        query: SessionQueryService,
    ) -> Self {
        Self { engine, sequencer, query }
    }

    /// Proving engine.
    pub fn engine(&self) -> &ProvingEngine<ARITY> {
        &self.engine
    }

    /// Submission sequencer.
    pub fn sequencer(&self) -> &SubmissionSequencer {
        &self.sequencer
    }

    /// Build a proof without submitting it.
    ///
    /// Identifiers are parsed before the engine is touched, so malformed
    /// input is rejected even while the engine is still compiling.
    pub async fn prove_only(&self, request: &RotationRequest) -> Result<SessionProof, RotationError> {
        let identifiers = DeviceIdentifierVector::<ARITY>::from_hex(&request.raw_identifiers)?;
        self.engine.prove(request.claim(), &identifiers).await
    }

    /// Prove and submit a session rotation.
    #[instrument(skip(self, request), fields(game_id = request.game_id))]
    pub async fn rotate(&self, request: &RotationRequest) -> Result<RotationReceipt, RotationError> {
        let proof = self.prove_only(request).await?;
        let nonce = self.sequencer.submit(proof.clone()).await.into_result()?;

        info!(
            nonce,
            device = %proof.result.identifier_commitment,
            new_session_key = proof.claim.new_session_key,
            "Session rotated"
        );
        Ok(RotationReceipt { proof, nonce })
    }

    /// Current session key of a device.
    pub async fn current_session(
        &self,
        commitment: &IdentifierCommitment,
    ) -> Result<Option<u64>, RotationError> {
        self.query.current_session(commitment).await
    }
}
