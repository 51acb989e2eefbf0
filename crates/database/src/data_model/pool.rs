use async_trait::async_trait;
use carpool::database::{PoolRepo, Result};
use model::{driver_trip::DriverTrip, pool::PoolAssignment, WithId};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::{
    queries::{
        convert_error,
        pool::{assignment_for_driver_trip, build, insert_all, members_for_pool},
    },
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

#[derive(Debug, Clone, FromRow)]
pub struct PoolRow {
    pub id: String,
    pub driver_trip_id: String,
    pub total_score: f64,
    pub avg_score: f64,
    pub seats_used: i32,
    pub seats_remaining: i32,
    pub total_detour_minutes: f64,
    pub ordered_stops_json: sqlx::types::Json<serde_json::Value>,
    pub status: String,
}

#[async_trait]
impl PoolRepo for PgDatabaseAutocommit {
    async fn insert_pool(
        &mut self,
        pool: PoolAssignment,
    ) -> Result<WithId<PoolAssignment>> {
        let mut tx = self.pool.begin().await.map_err(convert_error)?;
        let inserted = insert_all(&mut tx, pool).await?;
        tx.commit().await.map_err(convert_error)?;
        Ok(inserted)
    }

    async fn pool_for_driver_trip(
        &mut self,
        driver_trip_id: &Id<DriverTrip>,
    ) -> Result<Option<WithId<PoolAssignment>>> {
        let Some(row) = assignment_for_driver_trip(&self.pool, driver_trip_id).await?
        else {
            return Ok(None);
        };
        let members = members_for_pool(&self.pool, &row.id).await?;
        build(row, members).map(Some)
    }
}

#[async_trait]
impl<'a> PoolRepo for PgDatabaseTransaction<'a> {
    async fn insert_pool(
        &mut self,
        pool: PoolAssignment,
    ) -> Result<WithId<PoolAssignment>> {
        insert_all(&mut self.tx, pool).await
    }

    async fn pool_for_driver_trip(
        &mut self,
        driver_trip_id: &Id<DriverTrip>,
    ) -> Result<Option<WithId<PoolAssignment>>> {
        let Some(row) =
            assignment_for_driver_trip(&mut *self.tx, driver_trip_id).await?
        else {
            return Ok(None);
        };
        let members = members_for_pool(&mut *self.tx, &row.id).await?;
        build(row, members).map(Some)
    }
}
