use async_trait::async_trait;
use carpool::database::{Result, SessionRepo};
use chrono::{DateTime, Utc};
use model::{session::Session, WithId};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::{
    queries::session::{by_token_hash, deactivate_by_hash, insert, purge_expired, rotate},
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

use super::DatabaseRow;

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub active: bool,
}

impl DatabaseRow for SessionRow {
    type Model = Session;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id.clone())
    }

    fn to_model(self) -> Result<Session> {
        Ok(Session {
            user_id: Id::new(self.user_id),
            refresh_token_hash: self.refresh_token_hash,
            expires_at: self.expires_at,
            last_accessed: self.last_accessed,
            active: self.active,
        })
    }
}

#[async_trait]
impl SessionRepo for PgDatabaseAutocommit {
    async fn insert_session(&mut self, session: Session) -> Result<WithId<Session>> {
        insert(&self.pool, session).await
    }

    async fn session_by_token_hash(
        &mut self,
        refresh_token_hash: &str,
    ) -> Result<Option<WithId<Session>>> {
        by_token_hash(&self.pool, refresh_token_hash).await
    }

    async fn rotate_session(
        &mut self,
        id: &Id<Session>,
        old_hash: &str,
        new_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        rotate(&self.pool, id, old_hash, new_hash, expires_at, now).await
    }

    async fn deactivate_session_by_hash(
        &mut self,
        refresh_token_hash: &str,
    ) -> Result<u64> {
        deactivate_by_hash(&self.pool, refresh_token_hash).await
    }

    async fn purge_expired_sessions(&mut self, now: DateTime<Utc>) -> Result<u64> {
        purge_expired(&self.pool, now).await
    }
}

#[async_trait]
impl<'a> SessionRepo for PgDatabaseTransaction<'a> {
    async fn insert_session(&mut self, session: Session) -> Result<WithId<Session>> {
        insert(&mut *self.tx, session).await
    }

    async fn session_by_token_hash(
        &mut self,
        refresh_token_hash: &str,
    ) -> Result<Option<WithId<Session>>> {
        by_token_hash(&mut *self.tx, refresh_token_hash).await
    }

    async fn rotate_session(
        &mut self,
        id: &Id<Session>,
        old_hash: &str,
        new_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        rotate(&mut *self.tx, id, old_hash, new_hash, expires_at, now).await
    }

    async fn deactivate_session_by_hash(
        &mut self,
        refresh_token_hash: &str,
    ) -> Result<u64> {
        deactivate_by_hash(&mut *self.tx, refresh_token_hash).await
    }

    async fn purge_expired_sessions(&mut self, now: DateTime<Utc>) -> Result<u64> {
        purge_expired(&mut *self.tx, now).await
    }
}
