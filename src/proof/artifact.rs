//! Session proof artifact.
//!
//! Self-contained: the claim and result travel with the proof bytes, so a
//! verifier needs nothing but the verifying key.

use serde::{Serialize, Deserialize};

use crate::proof::public_inputs::{SessionTransitionClaim, SessionTransitionResult};

/// A constructed session transition proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProof {
    /// Public claim the proof attests to.
    pub claim: SessionTransitionClaim,
    /// Public result exposed by the circuit.
    pub result: SessionTransitionResult,
    /// Halo2 transcript.
    pub bytes: Vec<u8>,
}

impl SessionProof {
    /// Binary encoding (bincode).
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Hex of the binary encoding, as carried in JSON messages.
    pub fn to_hex(&self) -> Result<String, bincode::Error> {
        self.to_bytes().map(hex::encode)
    }

    /// Decode from hex.
    pub fn from_hex(s: &str) -> Result<Self, bincode::Error> {
        let data = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| Box::new(bincode::ErrorKind::Custom(e.to_string())))?;
        Self::from_bytes(&data)
    }
}
