//! Session Transition Public Inputs
//!
//! The claim a requester makes and the result the circuit exposes,
//! plus their encoding into the circuit's instance column.
//!
//! ## Instance layout
//!
//! ```text
//! row 0  gameId
//! row 1  currentSessionKey
//! row 2  newSessionKey
//! row 3  identifierCommitment
//! ```

use ff::Field;
use serde::{Serialize, Deserialize};

use crate::core::field::{Fp, field_from_u64};
use crate::proof::identifier::IdentifierCommitment;

/// Number of instance rows.
pub const PUBLIC_INPUT_COUNT: usize = 4;

/// Instance row of `gameId`.
pub const GAME_ID_ROW: usize = 0;
/// Instance row of `currentSessionKey`.
pub const CURRENT_KEY_ROW: usize = 1;
/// Instance row of `newSessionKey`.
pub const NEW_KEY_ROW: usize = 2;
/// Instance row of the identifier commitment.
pub const COMMITMENT_ROW: usize = 3;

/// Claimed session transition (public input).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTransitionClaim {
    /// Game (license) identifier.
    pub game_id: u64,
    /// Session key the device currently holds.
    pub current_session_key: u64,
    /// Session key to rotate to.
    pub new_session_key: u64,
}

impl SessionTransitionClaim {
    /// Create a claim.
    pub fn new(game_id: u64, current_session_key: u64, new_session_key: u64) -> Self {
        Self { game_id, current_session_key, new_session_key }
    }
}

/// Result exposed by the circuit (public output).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTransitionResult {
    /// Game identifier, copied from the claim.
    pub game_id: u64,
    /// New session key, copied from the claim.
    pub new_session_key: u64,
    /// Commitment to the private identifier vector.
    pub identifier_commitment: IdentifierCommitment,
}

impl SessionTransitionResult {
    /// Output for `claim` with the given commitment.
    pub fn for_claim(claim: &SessionTransitionClaim, identifier_commitment: IdentifierCommitment) -> Self {
        Self {
            game_id: claim.game_id,
            new_session_key: claim.new_session_key,
            identifier_commitment,
        }
    }

    /// Whether this result is the one `claim` can produce.
    pub fn is_consistent_with(&self, claim: &SessionTransitionClaim) -> bool {
        self.game_id == claim.game_id && self.new_session_key == claim.new_session_key
    }
}

/// Encode claim and result into instance column values.
pub fn instance_values(claim: &SessionTransitionClaim, result: &SessionTransitionResult) -> [Fp; PUBLIC_INPUT_COUNT] {
    let mut out = [Fp::ZERO; PUBLIC_INPUT_COUNT];
    out[GAME_ID_ROW] = field_from_u64(claim.game_id);
    out[CURRENT_KEY_ROW] = field_from_u64(claim.current_session_key);
    out[NEW_KEY_ROW] = field_from_u64(claim.new_session_key);
    out[COMMITMENT_ROW] = result.identifier_commitment.to_field();
    out
}
