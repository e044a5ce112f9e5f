//! Proving Engine
//!
//! Owns the compiled circuit (params, proving key, verifying key) and
//! serves proof requests once compilation has finished.
//!
//! ```text
//!  Uninitialized ──start_compilation──► Compiling ──keygen ok──► Ready
//!                                           │
//!                                           └──keygen err──► Failed
//! ```
//!
//! Requests made before `Ready` fail fast with `NotReady`; they never
//! block waiting for compilation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use halo2_proofs::{
    plonk::{create_proof, keygen_pk, keygen_vk, ProvingKey, VerifyingKey},
    poly::commitment::Params,
    transcript::{Blake2bWrite, Challenge255},
};
use pasta_curves::vesta;
use rand::rngs::OsRng;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::error::RotationError;
use crate::proof::artifact::SessionProof;
use crate::proof::circuit::{SessionTransitionCircuit, K};
use crate::proof::identifier::{commit, DeviceIdentifierVector, IDENTIFIER_ARITY};
use crate::proof::public_inputs::{instance_values, SessionTransitionClaim, SessionTransitionResult};
use crate::proof::verify::SessionVerifier;

/// Default time allowed for a single proof.
pub const DEFAULT_PROVE_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from key generation or proof construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProverError {
    /// Key generation failed.
    #[error("key generation failed: {0}")]
    Keygen(String),

    /// Prover rejected the witness or failed internally.
    #[error("proof synthesis failed: {0}")]
    Synthesis(String),

    /// Compilation requested from a state other than `Uninitialized`.
    #[error("compilation already started")]
    AlreadyStarted,
}

impl From<ProverError> for RotationError {
    fn from(err: ProverError) -> Self {
        RotationError::ProofConstructionFailure(err.to_string())
    }
}

/// Compiled circuit artifacts. Immutable once built.
pub struct CompiledCircuit<const ARITY: usize = IDENTIFIER_ARITY> {
    params: Arc<Params<vesta::Affine>>,
    pk: ProvingKey<vesta::Affine>,
    vk: Arc<VerifyingKey<vesta::Affine>>,
}

impl<const ARITY: usize> CompiledCircuit<ARITY> {
    /// Generate parameters and keys for the session transition circuit.
    pub fn compile() -> Result<Self, ProverError> {
        let params = Params::<vesta::Affine>::new(K);
        let shape = SessionTransitionCircuit::<ARITY>::default();

        let vk = keygen_vk(&params, &shape)
            .map_err(|e| ProverError::Keygen(format!("{:?}", e)))?;
        let pk = keygen_pk(&params, vk.clone(), &shape)
            .map_err(|e| ProverError::Keygen(format!("{:?}", e)))?;

        Ok(Self {
            params: Arc::new(params),
            pk,
            vk: Arc::new(vk),
        })
    }

    /// Build a proof for `claim` with private `identifiers`.
    pub fn prove(
        &self,
        claim: &SessionTransitionClaim,
        identifiers: &DeviceIdentifierVector<ARITY>,
    ) -> Result<SessionProof, ProverError> {
        let result = SessionTransitionResult::for_claim(claim, commit(identifiers));
        let instances = instance_values(claim, &result);
        let circuit = SessionTransitionCircuit::new(claim, identifiers);

        let mut transcript = Blake2bWrite::<_, vesta::Affine, Challenge255<_>>::init(vec![]);
        create_proof(
            &self.params,
            &self.pk,
            &[circuit],
            &[&[&instances[..]]],
            OsRng,
            &mut transcript,
        )
        .map_err(|e| ProverError::Synthesis(format!("{:?}", e)))?;

        Ok(SessionProof {
            claim: *claim,
            result,
            bytes: transcript.finalize(),
        })
    }

    /// Verifier sharing these keys.
    pub fn verifier(&self) -> SessionVerifier {
        SessionVerifier::new(self.params.clone(), self.vk.clone())
    }
}

/// Engine lifecycle.
#[derive(Clone)]
pub enum EngineState<const ARITY: usize = IDENTIFIER_ARITY> {
    /// Nothing compiled yet.
    Uninitialized,
    /// Key generation in progress.
    Compiling,
    /// Keys available.
    Ready(Arc<CompiledCircuit<ARITY>>),
    /// Key generation failed.
    Failed(String),
}

impl<const ARITY: usize> EngineState<ARITY> {
    /// Status without the payload.
    pub fn status(&self) -> EngineStatus {
        match self {
            Self::Uninitialized => EngineStatus::Uninitialized,
            Self::Compiling => EngineStatus::Compiling,
            Self::Ready(_) => EngineStatus::Ready,
            Self::Failed(_) => EngineStatus::Failed,
        }
    }
}

/// Reported engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Not started.
    Uninitialized,
    /// Compiling.
    Compiling,
    /// Serving proofs.
    Ready,
    /// Compilation failed.
    Failed,
}

impl EngineStatus {
    fn may_become(self, next: EngineStatus) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Compiling)
                | (Self::Compiling, Self::Ready)
                | (Self::Compiling, Self::Failed)
        )
    }
}

struct EngineInner<const ARITY: usize> {
    state: Mutex<EngineState<ARITY>>,
    proofs_started: AtomicU64,
    prove_timeout: Duration,
}

/// Proving engine handle. Cheap to clone.
#[derive(Clone)]
pub struct ProvingEngine<const ARITY: usize = IDENTIFIER_ARITY> {
    inner: Arc<EngineInner<ARITY>>,
}

impl<const ARITY: usize> ProvingEngine<ARITY> {
    /// Create an uninitialized engine.
    pub fn new(prove_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState::Uninitialized),
                proofs_started: AtomicU64::new(0),
                prove_timeout,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState<ARITY>> {
        // State is replaced wholesale, so a poisoned value is still coherent.
        self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The only place the state changes. Returns false if the engine is not
    /// in `from` or `from → to` is not a legal edge.
    fn transition(&self, from: EngineStatus, to: EngineState<ARITY>) -> bool {
        let mut state = self.lock_state();
        let current = state.status();
        let next = to.status();

        if current != from || !current.may_become(next) {
            debug!(?current, ?next, "Rejected engine transition");
            return false;
        }

        debug!(?current, ?next, "Engine transition");
        *state = to;
        true
    }

    /// Current status.
    pub fn state(&self) -> EngineStatus {
        self.lock_state().status()
    }

    /// Whether proofs can be served.
    pub fn is_ready(&self) -> bool {
        self.state() == EngineStatus::Ready
    }

    /// Number of proof constructions started.
    pub fn proofs_started(&self) -> u64 {
        self.inner.proofs_started.load(Ordering::SeqCst)
    }

    /// Start compiling in the background.
    ///
    /// Returns `None` if compilation was already started. Must be called
    /// from within a Tokio runtime.
    pub fn start_compilation(&self) -> Option<JoinHandle<()>> {
        if !self.transition(EngineStatus::Uninitialized, EngineState::Compiling) {
            return None;
        }

        info!(arity = ARITY, k = K, "Compiling session transition circuit");
        let engine = self.clone();

        Some(tokio::spawn(async move {
            let started = Instant::now();
            let outcome = tokio::task::spawn_blocking(CompiledCircuit::<ARITY>::compile).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(Ok(compiled)) => {
                    info!(elapsed_ms, "Proving engine ready");
                    engine.transition(EngineStatus::Compiling, EngineState::Ready(Arc::new(compiled)));
                }
                Ok(Err(e)) => {
                    error!(elapsed_ms, error = %e, "Circuit compilation failed");
                    engine.transition(EngineStatus::Compiling, EngineState::Failed(e.to_string()));
                }
                Err(join) => {
                    error!(elapsed_ms, error = %join, "Compilation task aborted");
                    engine.transition(EngineStatus::Compiling, EngineState::Failed(join.to_string()));
                }
            }
        }))
    }

    /// Compile on the current thread.
    pub fn compile_blocking(&self) -> Result<(), ProverError> {
        if !self.transition(EngineStatus::Uninitialized, EngineState::Compiling) {
            return Err(ProverError::AlreadyStarted);
        }

        let started = Instant::now();
        match CompiledCircuit::<ARITY>::compile() {
            Ok(compiled) => {
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Proving engine ready");
                self.transition(EngineStatus::Compiling, EngineState::Ready(Arc::new(compiled)));
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Circuit compilation failed");
                self.transition(EngineStatus::Compiling, EngineState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn compiled(&self) -> Result<Arc<CompiledCircuit<ARITY>>, RotationError> {
        match &*self.lock_state() {
            EngineState::Ready(compiled) => Ok(compiled.clone()),
            EngineState::Failed(reason) => Err(RotationError::ProofConstructionFailure(
                format!("engine failed to compile: {}", reason),
            )),
            EngineState::Uninitialized | EngineState::Compiling => Err(RotationError::NotReady),
        }
    }

    /// Verifier for proofs from this engine.
    pub fn verifier(&self) -> Result<SessionVerifier, RotationError> {
        self.compiled().map(|c| c.verifier())
    }

    /// Construct a session transition proof.
    #[instrument(skip(self, identifiers), fields(game_id = claim.game_id))]
    pub async fn prove(
        &self,
        claim: SessionTransitionClaim,
        identifiers: &DeviceIdentifierVector<ARITY>,
    ) -> Result<SessionProof, RotationError> {
        let compiled = self.compiled()?;
        self.inner.proofs_started.fetch_add(1, Ordering::SeqCst);

        let identifiers = identifiers.clone();
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || compiled.prove(&claim, &identifiers));

        match tokio::time::timeout(self.inner.prove_timeout, task).await {
            Err(_) => {
                error!(
                    timeout_secs = self.inner.prove_timeout.as_secs(),
                    current_session_key = claim.current_session_key,
                    new_session_key = claim.new_session_key,
                    "Proof construction timed out"
                );
                Err(RotationError::ProofConstructionFailure("timed out".into()))
            }
            Ok(Err(join)) => {
                error!(error = %join, "Proof task aborted");
                Err(RotationError::ProofConstructionFailure(join.to_string()))
            }
            Ok(Ok(Err(e))) => {
                error!(
                    error = %e,
                    current_session_key = claim.current_session_key,
                    new_session_key = claim.new_session_key,
                    "Proof construction failed"
                );
                Err(e.into())
            }
            Ok(Ok(Ok(proof))) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    proof_bytes = proof.bytes.len(),
                    "Proof constructed"
                );
                Ok(proof)
            }
        }
    }
}

impl<const ARITY: usize> Default for ProvingEngine<ARITY> {
    fn default() -> Self {
        Self::new(DEFAULT_PROVE_TIMEOUT)
    }
}

// =============================================================================
// TESTS
// =============================================================================
