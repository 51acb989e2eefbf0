use async_trait::async_trait;
use carpool::database::{MatchConfigRepo, Result};
use model::matching::MatchConfig;

use crate::{
    queries::config::{get, put},
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

#[async_trait]
impl MatchConfigRepo for PgDatabaseAutocommit {
    async fn get_match_config(&mut self, tenant: &str) -> Result<Option<MatchConfig>> {
        get(&self.pool, tenant).await
    }

    async fn put_match_config(
        &mut self,
        tenant: &str,
        config: &MatchConfig,
    ) -> Result<()> {
        put(&self.pool, tenant, config).await
    }
}

#[async_trait]
impl<'a> MatchConfigRepo for PgDatabaseTransaction<'a> {
    async fn get_match_config(&mut self, tenant: &str) -> Result<Option<MatchConfig>> {
        get(&mut *self.tx, tenant).await
    }

    async fn put_match_config(
        &mut self,
        tenant: &str,
        config: &MatchConfig,
    ) -> Result<()> {
        put(&mut *self.tx, tenant, config).await
    }
}
