use async_trait::async_trait;
use carpool::database::{LedgerRepo, Result};
use chrono::{DateTime, Utc};
use model::ledger::IdempotencyRecord;
use sqlx::prelude::FromRow;

use crate::{
    queries::ledger::{
        get_record, purge_webhook_events, put_record, record_webhook_event,
        webhook_event_seen,
    },
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRow {
    pub key: String,
    pub response_snapshot: Option<sqlx::types::Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
impl LedgerRepo for PgDatabaseAutocommit {
    async fn put_idempotency_record(
        &mut self,
        key: &str,
        snapshot: &serde_json::Value,
    ) -> Result<()> {
        put_record(&self.pool, key, snapshot).await
    }

    async fn get_idempotency_record(
        &mut self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        get_record(&self.pool, key).await
    }

    async fn record_webhook_event(
        &mut self,
        event_id: &str,
        event_type: &str,
    ) -> Result<u64> {
        record_webhook_event(&self.pool, event_id, event_type).await
    }

    async fn webhook_event_seen(&mut self, event_id: &str) -> Result<bool> {
        webhook_event_seen(&self.pool, event_id).await
    }

    async fn purge_webhook_events(
        &mut self,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        purge_webhook_events(&self.pool, older_than).await
    }
}

#[async_trait]
impl<'a> LedgerRepo for PgDatabaseTransaction<'a> {
    async fn put_idempotency_record(
        &mut self,
        key: &str,
        snapshot: &serde_json::Value,
    ) -> Result<()> {
        put_record(&mut *self.tx, key, snapshot).await
    }

    async fn get_idempotency_record(
        &mut self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        get_record(&mut *self.tx, key).await
    }

    async fn record_webhook_event(
        &mut self,
        event_id: &str,
        event_type: &str,
    ) -> Result<u64> {
        record_webhook_event(&mut *self.tx, event_id, event_type).await
    }

    async fn webhook_event_seen(&mut self, event_id: &str) -> Result<bool> {
        webhook_event_seen(&mut *self.tx, event_id).await
    }

    async fn purge_webhook_events(
        &mut self,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        purge_webhook_events(&mut *self.tx, older_than).await
    }
}
