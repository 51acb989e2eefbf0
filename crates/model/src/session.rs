use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::user::User;

/// A refresh-token session. Only the SHA-256 hash of the refresh token is
/// stored; the hash is overwritten atomically on every refresh so a replayed
/// old token no longer resolves.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: Id<User>,
    #[serde(skip_serializing)]
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub active: bool,
}

impl HasId for Session {
    type IdType = String;
}

impl Session {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at > now
    }
}
