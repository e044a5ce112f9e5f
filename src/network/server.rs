//! WebSocket Rotation Server
//!
//! Async WebSocket server exposing the session rotation pipeline.
//! Every request runs as its own task, so a slow proof never blocks
//! lookups or status queries on the same connection. Each connection has
//! a fixed number of request slots; requests beyond that are answered with
//! `server_overloaded`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, Semaphore, broadcast};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::error::RotationError;
use crate::network::protocol::{
    ClientMessage, ServerMessage, ServerError, ServerStatus, SessionLookup, RotatedInfo,
    ProofInfo, SessionRequest, LookupRequest,
};
use crate::proof::IDENTIFIER_ARITY;
use crate::session::SessionRotationService;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 4444;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Requests one connection may have in flight.
    pub max_requests_per_connection: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
            max_requests_per_connection: 8,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Rotation server errors.
#[derive(Debug, thiserror::Error)]
pub enum RotationServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Connection time.
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
    /// Requests received.
    requests: u64,
}

/// The rotation server.
pub struct RotationServer<const ARITY: usize = IDENTIFIER_ARITY> {
    /// Server configuration.
    config: ServerConfig,
    /// Rotation pipeline.
    service: SessionRotationService<ARITY>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl<const ARITY: usize> RotationServer<ARITY> {
    /// Create a new server.
    pub fn new(config: ServerConfig, service: SessionRotationService<ARITY>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            service,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run.
    pub async fn run(&self) -> Result<(), RotationServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Run on an already-bound listener.
    #[instrument(skip(self, listener))]
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), RotationServerError> {
        info!("Rotation server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if !self.register(addr).await {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(Self::reject_connection(stream, addr));
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Reserve a client slot; false when the server is full.
    async fn register(&self, addr: SocketAddr) -> bool {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.config.max_connections {
            return false;
        }
        clients.insert(addr, ConnectedClient {
            connected_at: Instant::now(),
            last_activity: Instant::now(),
            requests: 0,
        });
        true
    }

    /// Complete the handshake only to report the limit, then close.
    async fn reject_connection(stream: TcpStream, addr: SocketAddr) {
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };
        let reply = ServerMessage::Error(ServerError::overloaded(None, "Connection limit reached"));
        if let Ok(text) = reply.to_json() {
            let _ = ws.send(Message::Text(text)).await;
        }
        let _ = ws.close(None).await;
        debug!("Rejected {}", addr);
    }

    /// Handle a new WebSocket connection. `addr` must already be registered.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let in_flight = Arc::new(Semaphore::new(self.config.max_requests_per_connection));
        let service = self.service.clone();
        let version = self.config.version.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    clients.write().await.remove(&addr);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(
                                            ServerError::invalid_message(format!("Invalid message format: {}", e)),
                                        )).await;
                                        continue;
                                    }
                                };

                                // Update activity
                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                        client.requests += 1;
                                    }
                                }

                                let Ok(permit) = in_flight.clone().try_acquire_owned() else {
                                    warn!("Too many requests in flight from {}", addr);
                                    let request_id = client_msg.request_id().map(str::to_string);
                                    let _ = msg_tx.send(ServerMessage::Error(
                                        ServerError::overloaded(request_id, "Too many requests in flight"),
                                    )).await;
                                    continue;
                                };

                                let service = service.clone();
                                let version = version.clone();
                                let reply_tx = msg_tx.clone();
                                tokio::spawn(async move {
                                    let reply = Self::respond(&service, &version, client_msg).await;
                                    let _ = reply_tx.send(reply).await;
                                    drop(permit);
                                });
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::Error(
                                    ServerError::invalid_message("Binary frames are not supported"),
                                )).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Let queued replies drain before the writer stops.
            drop(msg_tx);
            let _ = sender_task.await;

            // Remove client
            if let Some(client) = clients.write().await.remove(&addr) {
                info!(
                    requests = client.requests,
                    connected_secs = client.connected_at.elapsed().as_secs(),
                    idle_secs = client.last_activity.elapsed().as_secs(),
                    "Client {} cleaned up", addr
                );
            }
        });
    }

    /// Produce the reply to one client message.
    async fn respond(
        service: &SessionRotationService<ARITY>,
        version: &str,
        msg: ClientMessage,
    ) -> ServerMessage {
        match msg {
            ClientMessage::RotateSession(req) => Self::handle_rotate(service, req).await,
            ClientMessage::ProveSession(req) => Self::handle_prove(service, req).await,
            ClientMessage::CurrentSession(req) => Self::handle_lookup(service, req).await,
            ClientMessage::Status => ServerMessage::Status(ServerStatus {
                engine: service.engine().state(),
                next_nonce: service.sequencer().next_nonce(),
                submitter: hex::encode(service.sequencer().public_key()),
                arity: ARITY,
                version: version.to_string(),
            }),
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
            },
        }
    }

    async fn handle_rotate(service: &SessionRotationService<ARITY>, req: SessionRequest) -> ServerMessage {
        let request_id = req.request_id.unwrap_or_else(new_request_id);

        match service.rotate(&req.rotation).await {
            Ok(receipt) => ServerMessage::SessionRotated(RotatedInfo::from_receipt(request_id, &receipt)),
            Err(e) => error_reply(request_id, &e),
        }
    }

    async fn handle_prove(service: &SessionRotationService<ARITY>, req: SessionRequest) -> ServerMessage {
        let request_id = req.request_id.unwrap_or_else(new_request_id);

        let result = service.prove_only(&req.rotation).await.and_then(|proof| {
            let encoded = proof
                .to_hex()
                .map_err(|e| RotationError::ProofConstructionFailure(format!("encoding: {}", e)))?;
            Ok(ProofInfo {
                request_id: request_id.clone(),
                device_commitment: proof.result.identifier_commitment,
                proof: encoded,
            })
        });

        match result {
            Ok(info) => ServerMessage::SessionProof(info),
            Err(e) => error_reply(request_id, &e),
        }
    }

    async fn handle_lookup(service: &SessionRotationService<ARITY>, req: LookupRequest) -> ServerMessage {
        let request_id = req.request_id.unwrap_or_else(new_request_id);

        match service.current_session(&req.device_commitment).await {
            Ok(session) => ServerMessage::CurrentSession(SessionLookup::new(request_id, session)),
            Err(e) => error_reply(request_id, &e),
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn error_reply(request_id: String, err: &RotationError) -> ServerMessage {
    debug!(%request_id, code = ?err.code(), "Request failed: {}", err);
    ServerMessage::Error(ServerError::from_rotation(Some(request_id), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::error::ErrorCode;
    use async_trait::async_trait;
    use ed25519_dalek::SigningKey;
    use crate::ledger::{
        LedgerClient, LedgerResponse, PendingTransaction, SessionStateStore, StoreReading,
        TransportError,
    };
    use crate::proof::{IdentifierCommitment, ProvingEngine, EngineStatus};
    use crate::session::{SessionQueryService, SubmissionSequencer, SequencerConfig, RotationRequest};

    struct EmptyLedger;

    #[async_trait]
    impl LedgerClient for EmptyLedger {
        async fn submit(&self, _: PendingTransaction) -> Result<LedgerResponse, TransportError> {
            Ok(LedgerResponse::Accepted)
        }
    }

    #[async_trait]
    impl SessionStateStore for EmptyLedger {
        async fn refresh(&self, _: &IdentifierCommitment) -> Result<(), TransportError> {
            Ok(())
        }

        async fn read(&self, _: &IdentifierCommitment) -> Result<StoreReading, TransportError> {
            Ok(StoreReading { session_key: None, fresh: true })
        }
    }

    /// Store whose calls never complete.
    struct StallingStore;

    #[async_trait]
    impl SessionStateStore for StallingStore {
        async fn refresh(&self, _: &IdentifierCommitment) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn read(&self, _: &IdentifierCommitment) -> Result<StoreReading, TransportError> {
            std::future::pending().await
        }
    }

    fn service_with_store(store: Arc<dyn SessionStateStore>) -> SessionRotationService<3> {
        let sequencer = SubmissionSequencer::spawn(
            Arc::new(EmptyLedger),
            SigningKey::from_bytes(&[2u8; 32]),
            SequencerConfig::default(),
        );
        SessionRotationService::new(ProvingEngine::default(), sequencer, SessionQueryService::new(store))
    }

    fn service() -> SessionRotationService<3> {
        service_with_store(Arc::new(EmptyLedger))
    }

    async fn next_reply<S>(ws: &mut S) -> ServerMessage
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let reply = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        ServerMessage::from_json(reply.to_text().unwrap()).unwrap()
    }

    fn rotation(raw: usize) -> SessionRequest {
        SessionRequest {
            request_id: Some("req-1".into()),
            rotation: RotationRequest {
                raw_identifiers: vec!["00".repeat(32); raw],
                game_id: 7,
                current_session_key: 0,
                new_session_key: 1,
            },
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_connections, 1000);
    }

    #[tokio::test]
    async fn test_status_reply() {
        let svc = service();
        match RotationServer::<3>::respond(&svc, "test", ClientMessage::Status).await {
            ServerMessage::Status(status) => {
                assert_eq!(status.engine, EngineStatus::Uninitialized);
                assert_eq!(status.next_nonce, Some(0));
                assert_eq!(status.arity, 3);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rotate_before_ready_is_retryable() {
        let svc = service();
        match RotationServer::<3>::respond(&svc, "test", ClientMessage::RotateSession(rotation(3))).await {
            ServerMessage::Error(err) => {
                assert_eq!(err.code, ErrorCode::NotReady);
                assert!(err.retryable);
                assert_eq!(err.request_id.as_deref(), Some("req-1"));
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_is_permanent() {
        let svc = service();
        match RotationServer::<3>::respond(&svc, "test", ClientMessage::ProveSession(rotation(4))).await {
            ServerMessage::Error(err) => {
                assert_eq!(err.code, ErrorCode::MalformedIdentifierInput);
                assert!(!err.retryable);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_websocket_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(RotationServer::new(ServerConfig::default(), service()));

        let running = server.clone();
        let handle = tokio::spawn(async move { running.run_on(listener).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();

        ws.send(Message::Text(r#"{"type":"ping","timestamp":42}"#.into())).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        match ServerMessage::from_json(reply.to_text().unwrap()).unwrap() {
            ServerMessage::Pong { timestamp, .. } => assert_eq!(timestamp, 42),
            other => panic!("Wrong message type: {:?}", other),
        }

        ws.send(Message::Text("garbage".into())).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        match ServerMessage::from_json(reply.to_text().unwrap()).unwrap() {
            ServerMessage::Error(err) => assert_eq!(err.code, ErrorCode::InvalidMessage),
            other => panic!("Wrong message type: {:?}", other),
        }

        assert_eq!(server.connection_count().await, 1);
        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit_counts_pending_handshakes() {
        let config = ServerConfig { max_connections: 2, ..ServerConfig::default() };
        let server = RotationServer::new(config, service());

        assert!(server.register("10.0.0.1:1000".parse().unwrap()).await);
        assert!(server.register("10.0.0.2:1000".parse().unwrap()).await);
        assert!(!server.register("10.0.0.3:1000".parse().unwrap()).await);
        assert_eq!(server.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_connection_over_limit_gets_overloaded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig { max_connections: 1, ..ServerConfig::default() };
        let server = Arc::new(RotationServer::new(config, service()));

        let running = server.clone();
        let handle = tokio::spawn(async move { running.run_on(listener).await });

        let (_first, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut second, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
        match next_reply(&mut second).await {
            ServerMessage::Error(err) => {
                assert_eq!(err.code, ErrorCode::ServerOverloaded);
                assert!(err.retryable);
            }
            other => panic!("Wrong message type: {:?}", other),
        }

        server.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_in_flight_requests_are_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig { max_requests_per_connection: 1, ..ServerConfig::default() };
        let server = Arc::new(RotationServer::new(config, service_with_store(Arc::new(StallingStore))));

        let running = server.clone();
        let handle = tokio::spawn(async move { running.run_on(listener).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
        let device = crate::proof::commit(&crate::proof::DeviceIdentifierVector::<3>::from_u64s([1, 2, 3]));
        for id in ["a", "b"] {
            let lookup = ClientMessage::CurrentSession(LookupRequest {
                request_id: Some(id.into()),
                device_commitment: device,
            });
            ws.send(Message::Text(lookup.to_json().unwrap())).await.unwrap();
        }

        // "a" holds the only slot
        match next_reply(&mut ws).await {
            ServerMessage::Error(err) => {
                assert_eq!(err.code, ErrorCode::ServerOverloaded);
                assert_eq!(err.request_id.as_deref(), Some("b"));
            }
            other => panic!("Wrong message type: {:?}", other),
        }

        server.shutdown();
        handle.await.unwrap().unwrap();
    }
}
