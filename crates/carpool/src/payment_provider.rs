use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A payment intent as the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Metadata attached to every intent so webhook events can be correlated
/// back to the booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMetadata {
    pub trip_id: String,
    pub user_id: String,
    pub booking_id: String,
}

#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub metadata: IntentMetadata,
}

/// Contract for the payment provider. Implementations carry their own
/// timeouts (5 s default) so a hung provider surfaces as a retryable error.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent>;

    async fn get_intent(&self, id: &str) -> Result<PaymentIntent>;

    /// Verifies the provider's webhook signature header against the raw
    /// body. Must be constant-time on the digest comparison.
    fn verify_webhook_signature(&self, body: &[u8], signature: &str, secret: &str)
        -> bool;
}

impl Error {
    pub(crate) fn provider(why: impl std::fmt::Display) -> Self {
        Self::Payment(why.to_string())
    }
}
