//! HTTP ledger gateway client.
//!
//! ```text
//! POST {base}/submit-session   {serializedProof, nonce, signature, publicKey}
//! POST {base}/refresh          {deviceCommitment}
//! POST {base}/current-session  {deviceCommitment} -> {sessionKey, fresh}
//! ```
//!
//! 2xx on submit is acceptance, 4xx is a rejection, anything else is a
//! transport failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use super::{
    LedgerClient, LedgerResponse, PendingTransaction, SessionStateStore, StoreReading,
    TransportError,
};
use crate::proof::IdentifierCommitment;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody {
    serialized_proof: String,
    nonce: u64,
    signature: String,
    public_key: String,
}

#[derive(Deserialize, Default)]
struct RejectBody {
    reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitmentBody {
    device_commitment: IdentifierCommitment,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadBody {
    session_key: Option<u64>,
    fresh: bool,
}

/// Client for an external ledger gateway.
pub struct RemoteLedger {
    base_url: String,
    client: Client,
}

impl RemoteLedger {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response, TransportError> {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Unreachable(err.to_string())
    }
}

fn server_failure(status: StatusCode) -> TransportError {
    TransportError::Unreachable(format!("gateway returned {}", status))
}

#[async_trait]
impl LedgerClient for RemoteLedger {
    async fn submit(&self, tx: PendingTransaction) -> Result<LedgerResponse, TransportError> {
        let serialized_proof = tx.proof
            .to_hex()
            .map_err(|e| TransportError::BadResponse(format!("proof encoding: {}", e)))?;
        let body = SubmitBody {
            serialized_proof,
            nonce: tx.nonce,
            signature: hex::encode(&tx.signature),
            public_key: hex::encode(tx.public_key),
        };

        let response = self.post("submit-session", &body).await?;
        let status = response.status();
        debug!(nonce = tx.nonce, %status, "Ledger gateway answered");

        if status.is_success() {
            Ok(LedgerResponse::Accepted)
        } else if status.is_client_error() {
            let reason = response
                .json::<RejectBody>()
                .await
                .unwrap_or_default()
                .reason
                .unwrap_or_else(|| status.to_string());
            Ok(LedgerResponse::Rejected(reason))
        } else {
            warn!(nonce = tx.nonce, %status, "Ledger gateway failure");
            Err(server_failure(status))
        }
    }
}

#[async_trait]
impl SessionStateStore for RemoteLedger {
    async fn refresh(&self, commitment: &IdentifierCommitment) -> Result<(), TransportError> {
        let response = self
            .post("refresh", &CommitmentBody { device_commitment: *commitment })
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(server_failure(response.status()))
        }
    }

    async fn read(&self, commitment: &IdentifierCommitment) -> Result<StoreReading, TransportError> {
        let response = self
            .post("current-session", &CommitmentBody { device_commitment: *commitment })
            .await?;
        if !response.status().is_success() {
            return Err(server_failure(response.status()));
        }

        let body: ReadBody = response
            .json()
            .await
            .map_err(|e| TransportError::BadResponse(e.to_string()))?;
        Ok(StoreReading {
            session_key: body.session_key,
            fresh: body.fresh,
        })
    }
}
