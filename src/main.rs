//! Device Session Server
//!
//! Serves session rotation requests over WebSocket.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use device_session::{
    network::RotationServer,
    InMemoryLedger, LedgerClient, ProvingEngine, RemoteLedger, ServiceConfig,
    SessionQueryService, SessionRotationService, SessionStateStore, SubmissionSequencer,
    IDENTIFIER_ARITY, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    info!("Device Session Server v{}", VERSION);
    info!(?config, "Configuration loaded");

    let engine = ProvingEngine::<IDENTIFIER_ARITY>::new(config.prove_timeout);
    let signing_key = config.signing_key();
    if config.submitter_key.is_none() {
        warn!("SUBMITTER_SECRET_KEY not set, using an ephemeral key");
    }

    let (ledger, store): (Arc<dyn LedgerClient>, Arc<dyn SessionStateStore>) = match &config.ledger_url {
        Some(url) => {
            info!("Using ledger gateway at {}", url);
            let remote = Arc::new(RemoteLedger::new(url.clone(), config.submit_timeout)?);
            // Requests get NotReady until this finishes.
            engine.start_compilation();
            (remote.clone(), remote)
        }
        None => {
            info!("No LEDGER_URL, running in-process ledger");
            // The in-process ledger verifies with the compiled key.
            let compiling = engine.clone();
            tokio::task::spawn_blocking(move || compiling.compile_blocking())
                .await
                .context("Compilation task failed")??;

            let local = Arc::new(InMemoryLedger::new(engine.verifier()?));
            local
                .authorize(signing_key.verifying_key().to_bytes(), config.start_nonce)
                .await;
            (local.clone(), local)
        }
    };

    let sequencer = SubmissionSequencer::spawn(ledger, signing_key, config.sequencer_config());
    let service = SessionRotationService::new(engine, sequencer, SessionQueryService::new(store));
    let server = Arc::new(RotationServer::new(config.server_config(), service));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            signal_server.shutdown();
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
