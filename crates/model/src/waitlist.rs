use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{
    trip::{Location, Trip},
    user::User,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    Waiting,
    Promoted,
    Cancelled,
}

impl WaitlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Promoted => "promoted",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A queued booking attempt for a full trip. Promotion is FIFO by
/// `joined_at` and materialises a fresh `requested` participant.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistEntry {
    pub trip_id: Id<Trip>,
    pub user_id: Id<User>,
    pub seats_needed: i32,
    pub pickup: Option<Location>,
    pub dropoff: Option<Location>,
    pub status: WaitlistStatus,
    pub joined_at: DateTime<Utc>,
}

impl HasId for WaitlistEntry {
    type IdType = String;
}
