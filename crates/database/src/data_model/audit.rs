use async_trait::async_trait;
use carpool::database::{AuditRepo, Result};
use chrono::{DateTime, Utc};
use model::{audit::AuditLogEntry, WithId};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::{queries::audit::insert, PgDatabaseAutocommit, PgDatabaseTransaction};

use super::DatabaseRow;

#[derive(Debug, Clone, FromRow)]
pub struct AuditRow {
    pub id: String,
    pub actor_id: Option<String>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub details_json: sqlx::types::Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl DatabaseRow for AuditRow {
    type Model = AuditLogEntry;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id.clone())
    }

    fn to_model(self) -> Result<AuditLogEntry> {
        Ok(AuditLogEntry {
            actor_id: self.actor_id.map(Id::new),
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            details: self.details_json.0,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl AuditRepo for PgDatabaseAutocommit {
    async fn insert_audit_log(
        &mut self,
        entry: AuditLogEntry,
    ) -> Result<WithId<AuditLogEntry>> {
        insert(&self.pool, entry).await
    }
}

#[async_trait]
impl<'a> AuditRepo for PgDatabaseTransaction<'a> {
    async fn insert_audit_log(
        &mut self,
        entry: AuditLogEntry,
    ) -> Result<WithId<AuditLogEntry>> {
        insert(&mut *self.tx, entry).await
    }
}
