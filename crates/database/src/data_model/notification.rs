use async_trait::async_trait;
use carpool::database::{NotificationRepo, Result};
use chrono::{DateTime, Utc};
use model::{
    notification::{Notification, NotificationKind},
    WithId,
};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::{
    queries::notification::insert, PgDatabaseAutocommit, PgDatabaseTransaction,
};

use super::{decode_text, DatabaseRow};

#[derive(Debug, Clone, FromRow)]
pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl DatabaseRow for NotificationRow {
    type Model = Notification;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id.clone())
    }

    fn to_model(self) -> Result<Notification> {
        Ok(Notification {
            user_id: Id::new(self.user_id),
            kind: decode_text::<NotificationKind>("kind", &self.kind)?,
            title: self.title,
            body: self.body,
            read: self.read,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl NotificationRepo for PgDatabaseAutocommit {
    async fn insert_notification(
        &mut self,
        notification: Notification,
    ) -> Result<WithId<Notification>> {
        insert(&self.pool, notification).await
    }
}

#[async_trait]
impl<'a> NotificationRepo for PgDatabaseTransaction<'a> {
    async fn insert_notification(
        &mut self,
        notification: Notification,
    ) -> Result<WithId<Notification>> {
        insert(&mut *self.tx, notification).await
    }
}
