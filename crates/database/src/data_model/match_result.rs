use async_trait::async_trait;
use carpool::database::{MatchRepo, Result};
use chrono::{DateTime, Utc};
use model::{
    driver_trip::DriverTrip,
    matching::{MatchResult, MatchStatus, ScoreBreakdown},
    rider_request::RiderRequest,
    WithId,
};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::{
    queries::match_result::{
        for_request, get, pending_for_driver_trip, transition, upsert,
    },
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

use super::{decode_json, decode_text, DatabaseRow};

#[derive(Debug, Clone, FromRow)]
pub struct MatchResultRow {
    pub id: String,
    pub driver_trip_id: String,
    pub rider_request_id: String,
    pub driver_id: String,
    pub rider_id: String,
    pub score: f64,
    pub breakdown_json: sqlx::types::Json<serde_json::Value>,
    pub estimated_pickup_time: DateTime<Utc>,
    pub detour_minutes: f64,
    pub pickup_distance_km: f64,
    pub carbon_saved_kg: f64,
    pub explanation: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl DatabaseRow for MatchResultRow {
    type Model = MatchResult;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id.clone())
    }

    fn to_model(self) -> Result<MatchResult> {
        Ok(MatchResult {
            driver_trip_id: Id::new(self.driver_trip_id),
            rider_request_id: Id::new(self.rider_request_id),
            driver_id: Id::new(self.driver_id),
            rider_id: Id::new(self.rider_id),
            score: self.score,
            breakdown: decode_json::<ScoreBreakdown>(
                "breakdown_json",
                self.breakdown_json.0,
            )?,
            estimated_pickup_time: self.estimated_pickup_time,
            detour_minutes: self.detour_minutes,
            pickup_distance_km: self.pickup_distance_km,
            carbon_saved_kg: self.carbon_saved_kg,
            explanation: self.explanation,
            status: decode_text::<MatchStatus>("status", &self.status)?,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl MatchRepo for PgDatabaseAutocommit {
    async fn upsert_match(
        &mut self,
        result: MatchResult,
    ) -> Result<WithId<MatchResult>> {
        upsert(&self.pool, result).await
    }

    async fn get_match(&mut self, id: &Id<MatchResult>) -> Result<WithId<MatchResult>> {
        get(&self.pool, id).await
    }

    async fn matches_for_request(
        &mut self,
        request_id: &Id<RiderRequest>,
    ) -> Result<Vec<WithId<MatchResult>>> {
        for_request(&self.pool, request_id).await
    }

    async fn pending_matches_for_driver_trip(
        &mut self,
        driver_trip_id: &Id<DriverTrip>,
    ) -> Result<Vec<WithId<MatchResult>>> {
        pending_for_driver_trip(&self.pool, driver_trip_id).await
    }

    async fn transition_match(
        &mut self,
        id: &Id<MatchResult>,
        from: &[MatchStatus],
        to: MatchStatus,
    ) -> Result<u64> {
        transition(&self.pool, id, from, to).await
    }
}

#[async_trait]
impl<'a> MatchRepo for PgDatabaseTransaction<'a> {
    async fn upsert_match(
        &mut self,
        result: MatchResult,
    ) -> Result<WithId<MatchResult>> {
        upsert(&mut *self.tx, result).await
    }

    async fn get_match(&mut self, id: &Id<MatchResult>) -> Result<WithId<MatchResult>> {
        get(&mut *self.tx, id).await
    }

    async fn matches_for_request(
        &mut self,
        request_id: &Id<RiderRequest>,
    ) -> Result<Vec<WithId<MatchResult>>> {
        for_request(&mut *self.tx, request_id).await
    }

    async fn pending_matches_for_driver_trip(
        &mut self,
        driver_trip_id: &Id<DriverTrip>,
    ) -> Result<Vec<WithId<MatchResult>>> {
        pending_for_driver_trip(&mut *self.tx, driver_trip_id).await
    }

    async fn transition_match(
        &mut self,
        id: &Id<MatchResult>,
        from: &[MatchStatus],
        to: MatchStatus,
    ) -> Result<u64> {
        transition(&mut *self.tx, id, from, to).await
    }
}
