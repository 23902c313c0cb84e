//! Time-ordered change identifiers.
//!
//! A [`ChangeId`] is a UUIDv7: 128 bits, lexicographically sortable by
//! creation time. Generation is process-wide monotonic; a hi-watermark
//! guards against clock regression so ordering within a branch never goes
//! backwards even under clock skew.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::{ContextV7, Timestamp, Uuid};

use crate::{CinchError, Result};

lazy_static! {
    static ref V7_STATE: Mutex<(ContextV7, u128)> = Mutex::new((ContextV7::new(), 0));
}

/// Identifier of a schema change, totally ordered within a branch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChangeId(Uuid);

impl ChangeId {
    /// Generate a new id, strictly greater than any id previously issued by
    /// this process.
    pub fn generate() -> Self {
        let mut state = V7_STATE.lock();
        let candidate = Uuid::new_v7(Timestamp::now(&state.0));
        let value = candidate.as_u128();
        if value > state.1 {
            state.1 = value;
            Self(candidate)
        } else {
            // Clock went backwards (or stood still past the context's
            // counter); fall back to incrementing the watermark.
            state.1 += 1;
            Self(Uuid::from_u128(state.1))
        }
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for ChangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.as_hyphenated().fmt(f)
    }
}

impl std::str::FromStr for ChangeId {
    type Err = CinchError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CinchError::storage("parse change id", e))
    }
}
