use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::{
    error::{Error, Result},
    payment_provider::{IntentRequest, PaymentIntent, PaymentProvider},
};

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Signed webhooks older than this are rejected outright.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct IntentBody {
    id: String,
    client_secret: String,
    amount: i64,
    currency: String,
    status: Option<String>,
}

/// Payment provider client over the Stripe-shaped REST surface. Every call
/// carries the request timeout so a hung provider returns a retryable error
/// to the caller.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(Error::provider)?;
        Ok(Self {
            http,
            secret_key,
            base_url: DEFAULT_BASE_URL.to_owned(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn parse_intent(response: reqwest::Response) -> Result<PaymentIntent> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("payment provider returned {}: {}", status, body);
            return Err(Error::Payment(format!("provider status {}", status)));
        }
        let body: IntentBody = response.json().await.map_err(Error::provider)?;
        Ok(PaymentIntent {
            id: body.id,
            client_secret: body.client_secret,
            amount: body.amount,
            currency: body.currency,
            status: body.status,
        })
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent> {
        let amount = request.amount_minor.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("description", request.description.as_str()),
            ("metadata[tripId]", request.metadata.trip_id.as_str()),
            ("metadata[userId]", request.metadata.user_id.as_str()),
            ("metadata[bookingId]", request.metadata.booking_id.as_str()),
        ];
        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(Error::provider)?;
        Self::parse_intent(response).await
    }

    async fn get_intent(&self, id: &str) -> Result<PaymentIntent> {
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/{}", self.base_url, id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(Error::provider)?;
        Self::parse_intent(response).await
    }

    fn verify_webhook_signature(
        &self,
        body: &[u8],
        signature: &str,
        secret: &str,
    ) -> bool {
        verify_signature_header(body, signature, secret, Utc::now().timestamp())
    }
}

/// Checks a `t=...,v1=...` signature header: HMAC-SHA256 over
/// `{timestamp}.{body}`, constant-time digest comparison, bounded clock
/// skew.
pub fn verify_signature_header(
    body: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }
    let Some(timestamp) = timestamp else {
        return false;
    };
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return false;
    }
    candidates.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    })
}

/// Builds a valid signature header for a payload. Used by tests and local
/// tooling that replays webhooks.
pub fn sign_payload(body: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payload(body, "whsec_test", 1_700_000_000);
        assert!(verify_signature_header(
            body,
            &header,
            "whsec_test",
            1_700_000_010
        ));
    }

    #[test]
    fn rejects_wrong_secret_and_tampered_body() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payload(body, "whsec_test", 1_700_000_000);
        assert!(!verify_signature_header(
            body,
            &header,
            "whsec_other",
            1_700_000_010
        ));
        assert!(!verify_signature_header(
            br#"{"id":"evt_2"}"#,
            &header,
            "whsec_test",
            1_700_000_010
        ));
    }

    #[test]
    fn rejects_stale_timestamps() {
        let body = b"{}";
        let header = sign_payload(body, "whsec_test", 1_700_000_000);
        assert!(!verify_signature_header(
            body,
            &header,
            "whsec_test",
            1_700_000_000 + SIGNATURE_TOLERANCE_SECS + 1
        ));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(!verify_signature_header(b"{}", "v1=abcd", "whsec_test", 0));
        assert!(!verify_signature_header(b"{}", "", "whsec_test", 0));
    }
}
