use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::HasId;

/// Durable dedup record for a provider webhook delivery. Keyed by the
/// provider's event id; kept for at least seven days.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
}

impl HasId for WebhookEvent {
    // the provider event id, e.g. "evt_..."
    type IdType = String;
}

/// Request-side idempotency record with the response snapshot replayed to
/// retries carrying the same key.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub response_snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl HasId for IdempotencyRecord {
    // the fully-qualified ledger key, "idempotency:{scope}:{user}:{key}"
    type IdType = String;
}
