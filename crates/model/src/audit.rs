use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::user::User;

/// Append-only audit trail row. Written best-effort next to state changes
/// that money or moderation cares about.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub actor_id: Option<Id<User>>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl HasId for AuditLogEntry {
    type IdType = String;
}

pub const ACTION_PAYMENT_SUCCEEDED: &str = "PAYMENT_SUCCEEDED";
pub const ACTION_PAYMENT_FAILED: &str = "PAYMENT_FAILED";
pub const ACTION_BOOKING_ACCEPTED: &str = "BOOKING_ACCEPTED";
pub const ACTION_BOOKING_REJECTED: &str = "BOOKING_REJECTED";
pub const ACTION_TRIP_CANCELLED: &str = "TRIP_CANCELLED";
