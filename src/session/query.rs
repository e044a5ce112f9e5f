//! Session Query Service
//!
//! Point reads of a device's current session key. An unknown device is
//! `Ok(None)`; a store that cannot be reached or refreshed is an error.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::error::RotationError;
use crate::ledger::SessionStateStore;
use crate::proof::IdentifierCommitment;

/// Reads session keys from the state store.
#[derive(Clone)]
pub struct SessionQueryService {
    store: Arc<dyn SessionStateStore>,
}

impl SessionQueryService {
    /// Create over `store`.
    pub fn new(store: Arc<dyn SessionStateStore>) -> Self {
        Self { store }
    }

    /// Current session key of `commitment`, refreshing the view first.
    #[instrument(skip(self), fields(device = %commitment))]
    pub async fn current_session(
        &self,
        commitment: &IdentifierCommitment,
    ) -> Result<Option<u64>, RotationError> {
        self.store.refresh(commitment).await?;
        let reading = self.store.read(commitment).await?;

        if !reading.fresh {
            warn!("State store view still stale after refresh");
            return Err(RotationError::TransportFailure("state view is stale".into()));
        }

        debug!(session_key = ?reading.session_key, "Session lookup");
        Ok(reading.session_key)
    }
}
