use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::HasId;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserFlags {
    pub active: bool,
    pub email_verified: bool,
    pub mfa_enabled: bool,
    pub docs_verified: bool,
}

/// Notification preferences, persisted as a JSON blob. Fields added later
/// default on read so older rows keep working.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPrefs {
    pub booking: bool,
    pub payment: bool,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            booking: true,
            payment: true,
        }
    }
}

/// An account. All PII lives in `encrypted_profile`, opaque ciphertext from
/// the crypto service; the only queryable identity datum is the
/// deterministic `email_lookup_hash`.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email_lookup_hash: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub oauth_identity: Option<String>,
    #[serde(skip)]
    pub encrypted_profile: Vec<u8>,
    pub role: Role,
    pub flags: UserFlags,
    pub rating: Option<f64>,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub notification_prefs: NotificationPrefs,
}

impl HasId for User {
    type IdType = String;
}
