use async_trait::async_trait;
use carpool::database::{Result, RiderRequestRepo};
use chrono::{DateTime, Utc};
use model::{
    driver_trip::DriverTrip,
    rider_request::{RequestStatus, RiderPreferences, RiderRequest},
    trip::Location,
    WithId,
};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::{
    queries::rider_request::{get, insert, pending, set_matched_trip, transition},
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

use super::{decode_json, decode_text, DatabaseRow};

#[derive(Debug, Clone, FromRow)]
pub struct RiderRequestRow {
    pub id: String,
    pub rider_id: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: Option<String>,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub dropoff_address: Option<String>,
    pub earliest_departure: DateTime<Utc>,
    pub latest_departure: DateTime<Utc>,
    pub seats_needed: i32,
    pub preferences_json: sqlx::types::Json<serde_json::Value>,
    pub status: String,
    pub matched_trip_id: Option<String>,
    pub organization_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DatabaseRow for RiderRequestRow {
    type Model = RiderRequest;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id.clone())
    }

    fn to_model(self) -> Result<RiderRequest> {
        Ok(RiderRequest {
            rider_id: Id::new(self.rider_id),
            pickup: Location {
                latitude: self.pickup_lat,
                longitude: self.pickup_lng,
                address: self.pickup_address,
            },
            dropoff: Location {
                latitude: self.dropoff_lat,
                longitude: self.dropoff_lng,
                address: self.dropoff_address,
            },
            earliest_departure: self.earliest_departure,
            latest_departure: self.latest_departure,
            seats_needed: self.seats_needed,
            preferences: decode_json::<RiderPreferences>(
                "preferences_json",
                self.preferences_json.0,
            )?,
            status: decode_text::<RequestStatus>("status", &self.status)?,
            matched_trip_id: self.matched_trip_id.map(Id::new),
            organization_id: self.organization_id,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl RiderRequestRepo for PgDatabaseAutocommit {
    async fn insert_rider_request(
        &mut self,
        request: RiderRequest,
    ) -> Result<WithId<RiderRequest>> {
        insert(&self.pool, request).await
    }

    async fn get_rider_request(
        &mut self,
        id: &Id<RiderRequest>,
    ) -> Result<WithId<RiderRequest>> {
        get(&self.pool, id).await
    }

    async fn pending_rider_requests(
        &mut self,
        limit: usize,
    ) -> Result<Vec<WithId<RiderRequest>>> {
        pending(&self.pool, limit).await
    }

    async fn transition_rider_request(
        &mut self,
        id: &Id<RiderRequest>,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<u64> {
        transition(&self.pool, id, from, to).await
    }

    async fn set_matched_trip(
        &mut self,
        id: &Id<RiderRequest>,
        driver_trip_id: Option<&Id<DriverTrip>>,
    ) -> Result<()> {
        set_matched_trip(&self.pool, id, driver_trip_id).await
    }
}

#[async_trait]
impl<'a> RiderRequestRepo for PgDatabaseTransaction<'a> {
    async fn insert_rider_request(
        &mut self,
        request: RiderRequest,
    ) -> Result<WithId<RiderRequest>> {
        insert(&mut *self.tx, request).await
    }

    async fn get_rider_request(
        &mut self,
        id: &Id<RiderRequest>,
    ) -> Result<WithId<RiderRequest>> {
        get(&mut *self.tx, id).await
    }

    async fn pending_rider_requests(
        &mut self,
        limit: usize,
    ) -> Result<Vec<WithId<RiderRequest>>> {
        pending(&mut *self.tx, limit).await
    }

    async fn transition_rider_request(
        &mut self,
        id: &Id<RiderRequest>,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<u64> {
        transition(&mut *self.tx, id, from, to).await
    }

    async fn set_matched_trip(
        &mut self,
        id: &Id<RiderRequest>,
        driver_trip_id: Option<&Id<DriverTrip>>,
    ) -> Result<()> {
        set_matched_trip(&mut *self.tx, id, driver_trip_id).await
    }
}
