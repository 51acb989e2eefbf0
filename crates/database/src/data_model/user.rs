use async_trait::async_trait;
use carpool::database::{Result, UserRepo};
use model::{
    user::{NotificationPrefs, Role, User, UserFlags},
    WithId,
};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::{
    queries::user::{by_email_hash, get, insert, recompute_driver_rating},
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

use super::{decode_json, decode_text, DatabaseRow};

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub email_lookup_hash: String,
    pub password_hash: Option<String>,
    pub oauth_identity: Option<String>,
    pub encrypted_profile: Vec<u8>,
    pub role: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub mfa_enabled: bool,
    pub docs_verified: bool,
    pub rating: Option<f64>,
    pub organization_id: Option<String>,
    pub notification_prefs_json: sqlx::types::Json<serde_json::Value>,
}

impl DatabaseRow for UserRow {
    type Model = User;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id.clone())
    }

    fn to_model(self) -> Result<User> {
        Ok(User {
            email_lookup_hash: self.email_lookup_hash,
            password_hash: self.password_hash,
            oauth_identity: self.oauth_identity,
            encrypted_profile: self.encrypted_profile,
            role: decode_text::<Role>("role", &self.role)?,
            flags: UserFlags {
                active: self.is_active,
                email_verified: self.email_verified,
                mfa_enabled: self.mfa_enabled,
                docs_verified: self.docs_verified,
            },
            rating: self.rating,
            organization_id: self.organization_id,
            notification_prefs: decode_json::<NotificationPrefs>(
                "notification_prefs_json",
                self.notification_prefs_json.0,
            )?,
        })
    }
}

#[async_trait]
impl UserRepo for PgDatabaseAutocommit {
    async fn insert_user(&mut self, user: User) -> Result<WithId<User>> {
        insert(&self.pool, user).await
    }

    async fn get_user(&mut self, id: &Id<User>) -> Result<WithId<User>> {
        get(&self.pool, id).await
    }

    async fn user_by_email_hash(
        &mut self,
        email_lookup_hash: &str,
    ) -> Result<Option<WithId<User>>> {
        by_email_hash(&self.pool, email_lookup_hash).await
    }

    async fn recompute_driver_rating(
        &mut self,
        driver_id: &Id<User>,
    ) -> Result<Option<f64>> {
        recompute_driver_rating(&self.pool, driver_id).await
    }
}

#[async_trait]
impl<'a> UserRepo for PgDatabaseTransaction<'a> {
    async fn insert_user(&mut self, user: User) -> Result<WithId<User>> {
        insert(&mut *self.tx, user).await
    }

    async fn get_user(&mut self, id: &Id<User>) -> Result<WithId<User>> {
        get(&mut *self.tx, id).await
    }

    async fn user_by_email_hash(
        &mut self,
        email_lookup_hash: &str,
    ) -> Result<Option<WithId<User>>> {
        by_email_hash(&mut *self.tx, email_lookup_hash).await
    }

    async fn recompute_driver_rating(
        &mut self,
        driver_id: &Id<User>,
    ) -> Result<Option<f64>> {
        recompute_driver_rating(&mut *self.tx, driver_id).await
    }
}
