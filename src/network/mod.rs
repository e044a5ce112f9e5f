//! Network Layer
//!
//! WebSocket server exposing rotation, proof, and lookup requests.

pub mod protocol;
pub mod server;

pub use protocol::{
    ClientMessage, ServerMessage, SessionRequest, LookupRequest, ServerError, ServerStatus,
    SessionLookup, RotatedInfo, ProofInfo,
};
pub use server::{RotationServer, ServerConfig, RotationServerError, DEFAULT_PORT};
