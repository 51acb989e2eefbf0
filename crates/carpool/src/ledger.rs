use std::{sync::Arc, time::Duration};

use log::warn;
use serde_json::Value;

use crate::{
    database::{Database, LedgerRepo as _},
    kv::KvStore,
};

const REQUEST_TTL: Duration = Duration::from_secs(10 * 60);
const WEBHOOK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Unified replay store for request idempotency keys and provider webhook
/// event ids. Lookups go KV-first (fast) with the durable table as the
/// second chance. All operations are total: KV errors degrade to DB-only,
/// DB errors degrade to KV-only, both logged and never surfaced. A hit means
/// "operation already executed" and callers must perform no further side
/// effects.
#[derive(Clone)]
pub struct IdempotencyLedger<D: Database> {
    database: D,
    kv: Arc<dyn KvStore>,
}

impl<D: Database> IdempotencyLedger<D> {
    pub fn new(database: D, kv: Arc<dyn KvStore>) -> Self {
        Self { database, kv }
    }

    pub fn request_key(scope: &str, user_id: &str, idempotency_key: &str) -> String {
        format!("idempotency:{}:{}:{}", scope, user_id, idempotency_key)
    }

    pub fn webhook_key(provider: &str, event_id: &str) -> String {
        format!("webhook:{}:{}", provider, event_id)
    }

    /// Stored response for a request key, if any.
    pub async fn stored_response(
        &self,
        scope: &str,
        user_id: &str,
        idempotency_key: &str,
    ) -> Option<Value> {
        let key = Self::request_key(scope, user_id, idempotency_key);
        match self.kv.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => return Some(value),
                Err(why) => warn!("ledger: discarding unparsable kv entry: {}", why),
            },
            Ok(None) => {}
            Err(why) => warn!("ledger: kv read failed, falling back to db: {}", why),
        }
        match self.database.auto().get_idempotency_record(&key).await {
            Ok(record) => record.and_then(|record| record.response_snapshot),
            Err(why) => {
                warn!("ledger: durable read failed, kv only: {:?}", why);
                None
            }
        }
    }

    /// Persists a response under a request key: KV with a 10 minute TTL plus
    /// the durable table which outlives KV eviction.
    pub async fn store_response(
        &self,
        scope: &str,
        user_id: &str,
        idempotency_key: &str,
        response: &Value,
    ) {
        let key = Self::request_key(scope, user_id, idempotency_key);
        if let Err(why) = self
            .kv
            .put(&key, response.to_string(), Some(REQUEST_TTL))
            .await
        {
            warn!("ledger: kv write failed, db only: {}", why);
        }
        if let Err(why) = self
            .database
            .auto()
            .put_idempotency_record(&key, response)
            .await
        {
            warn!("ledger: durable write failed, kv only: {:?}", why);
        }
    }

    /// Whether a provider event id was already processed.
    pub async fn seen_webhook(&self, provider: &str, event_id: &str) -> bool {
        let key = Self::webhook_key(provider, event_id);
        match self.kv.get(&key).await {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(why) => warn!("ledger: kv read failed, falling back to db: {}", why),
        }
        match self.database.auto().webhook_event_seen(event_id).await {
            Ok(seen) => seen,
            Err(why) => {
                warn!("ledger: durable read failed, kv only: {:?}", why);
                false
            }
        }
    }

    /// Cron-invoked retention sweep. Durable webhook rows are kept for at
    /// least the KV TTL so a KV eviction never re-opens a processed event.
    pub async fn purge_webhooks(&self) -> crate::Result<u64> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::seconds(WEBHOOK_TTL.as_secs() as i64);
        Ok(self.database.auto().purge_webhook_events(cutoff).await?)
    }

    /// Marks a provider event as processed. Callers invoke this after all
    /// side effects so a crash mid-handler leaves the event eligible for
    /// redelivery.
    pub async fn mark_webhook(&self, provider: &str, event_id: &str, event_type: &str) {
        let key = Self::webhook_key(provider, event_id);
        if let Err(why) = self.kv.put(&key, "1".to_owned(), Some(WEBHOOK_TTL)).await {
            warn!("ledger: kv write failed, db only: {}", why);
        }
        if let Err(why) = self
            .database
            .auto()
            .record_webhook_event(event_id, event_type)
            .await
        {
            warn!("ledger: durable write failed, kv only: {:?}", why);
        }
    }
}
