//! Verification API
//!
//! Verify a session proof against the compiled verifying key.
//! Instances are rebuilt from the claim and result carried in the artifact.

use std::sync::Arc;

use halo2_proofs::{
    plonk::{verify_proof, SingleVerifier, VerifyingKey},
    poly::commitment::Params,
    transcript::{Blake2bRead, Challenge255},
};
use pasta_curves::vesta;
use thiserror::Error;

use crate::proof::artifact::SessionProof;
use crate::proof::public_inputs::instance_values;

/// Errors that can occur during verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// Result does not carry the claim's game id and new key.
    #[error("result does not match claim")]
    ResultMismatch,

    /// No proof bytes.
    #[error("empty proof")]
    EmptyProof,

    /// Halo2 verifier rejected the transcript.
    #[error("proof rejected: {0}")]
    Rejected(String),
}

/// Verifier sharing the compiled parameters and verifying key.
#[derive(Clone)]
pub struct SessionVerifier {
    params: Arc<Params<vesta::Affine>>,
    vk: Arc<VerifyingKey<vesta::Affine>>,
}

impl SessionVerifier {
    /// Create from compiled keys.
    pub fn new(params: Arc<Params<vesta::Affine>>, vk: Arc<VerifyingKey<vesta::Affine>>) -> Self {
        Self { params, vk }
    }

    /// Verify a session proof.
    pub fn verify(&self, proof: &SessionProof) -> Result<(), VerificationError> {
        if !proof.result.is_consistent_with(&proof.claim) {
            return Err(VerificationError::ResultMismatch);
        }
        if proof.bytes.is_empty() {
            return Err(VerificationError::EmptyProof);
        }

        let instances = instance_values(&proof.claim, &proof.result);
        let strategy = SingleVerifier::new(&self.params);
        let mut transcript = Blake2bRead::<_, vesta::Affine, Challenge255<_>>::init(&proof.bytes[..]);

        verify_proof(
            &self.params,
            &self.vk,
            strategy,
            &[&[&instances[..]]],
            &mut transcript,
        )
        .map_err(|e| VerificationError::Rejected(format!("{:?}", e)))
    }
}

impl std::fmt::Debug for SessionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionVerifier").finish_non_exhaustive()
    }
}
