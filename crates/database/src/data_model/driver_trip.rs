use async_trait::async_trait;
use carpool::database::{DriverTripRepo, Result};
use chrono::{DateTime, Utc};
use model::{
    driver_trip::{DriverTrip, OfferStatus},
    matching::MatchConfig,
    rider_request::RiderRequest,
    trip::{Location, Vehicle},
    WithId,
};
use sqlx::prelude::FromRow;
use utility::{geo::BoundingBox, id::Id};

use crate::{
    queries::driver_trip::{find_candidates, get, insert, reserve_seats, transition},
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

use super::{decode_json, decode_text, DatabaseRow};

#[derive(Debug, Clone, FromRow)]
pub struct DriverTripRow {
    pub id: String,
    pub driver_id: String,
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub origin_address: Option<String>,
    pub destination_lat: f64,
    pub destination_lng: f64,
    pub destination_address: Option<String>,
    pub bbox_min_lat: f64,
    pub bbox_max_lat: f64,
    pub bbox_min_lng: f64,
    pub bbox_max_lng: f64,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub total_seats: i32,
    pub available_seats: i32,
    pub price_per_seat: f64,
    pub currency: String,
    pub vehicle_json: sqlx::types::Json<serde_json::Value>,
    pub status: String,
    pub polyline: Option<String>,
    pub driver_rating: Option<f64>,
    pub organization_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DatabaseRow for DriverTripRow {
    type Model = DriverTrip;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id.clone())
    }

    fn to_model(self) -> Result<DriverTrip> {
        Ok(DriverTrip {
            driver_id: Id::new(self.driver_id),
            origin: Location {
                latitude: self.origin_lat,
                longitude: self.origin_lng,
                address: self.origin_address,
            },
            destination: Location {
                latitude: self.destination_lat,
                longitude: self.destination_lng,
                address: self.destination_address,
            },
            bbox: BoundingBox {
                min_lat: self.bbox_min_lat,
                max_lat: self.bbox_max_lat,
                min_lng: self.bbox_min_lng,
                max_lng: self.bbox_max_lng,
            },
            departure_time: self.departure_time,
            arrival_time: self.arrival_time,
            total_seats: self.total_seats,
            available_seats: self.available_seats,
            price_per_seat: self.price_per_seat,
            currency: self.currency,
            vehicle: decode_json::<Vehicle>("vehicle_json", self.vehicle_json.0)?,
            status: decode_text::<OfferStatus>("status", &self.status)?,
            polyline: self.polyline,
            driver_rating: self.driver_rating,
            organization_id: self.organization_id,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl DriverTripRepo for PgDatabaseAutocommit {
    async fn insert_driver_trip(
        &mut self,
        trip: DriverTrip,
    ) -> Result<WithId<DriverTrip>> {
        insert(&self.pool, trip).await
    }

    async fn get_driver_trip(
        &mut self,
        id: &Id<DriverTrip>,
    ) -> Result<WithId<DriverTrip>> {
        get(&self.pool, id).await
    }

    async fn find_candidate_drivers(
        &mut self,
        request: &RiderRequest,
        config: &MatchConfig,
    ) -> Result<Vec<WithId<DriverTrip>>> {
        find_candidates(&self.pool, request, config).await
    }

    async fn reserve_offer_seats(
        &mut self,
        id: &Id<DriverTrip>,
        seats: i32,
    ) -> Result<u64> {
        reserve_seats(&self.pool, id, seats).await
    }

    async fn transition_offer(
        &mut self,
        id: &Id<DriverTrip>,
        from: &[OfferStatus],
        to: OfferStatus,
    ) -> Result<u64> {
        transition(&self.pool, id, from, to).await
    }
}

#[async_trait]
impl<'a> DriverTripRepo for PgDatabaseTransaction<'a> {
    async fn insert_driver_trip(
        &mut self,
        trip: DriverTrip,
    ) -> Result<WithId<DriverTrip>> {
        insert(&mut *self.tx, trip).await
    }

    async fn get_driver_trip(
        &mut self,
        id: &Id<DriverTrip>,
    ) -> Result<WithId<DriverTrip>> {
        get(&mut *self.tx, id).await
    }

    async fn find_candidate_drivers(
        &mut self,
        request: &RiderRequest,
        config: &MatchConfig,
    ) -> Result<Vec<WithId<DriverTrip>>> {
        find_candidates(&mut *self.tx, request, config).await
    }

    async fn reserve_offer_seats(
        &mut self,
        id: &Id<DriverTrip>,
        seats: i32,
    ) -> Result<u64> {
        reserve_seats(&mut *self.tx, id, seats).await
    }

    async fn transition_offer(
        &mut self,
        id: &Id<DriverTrip>,
        from: &[OfferStatus],
        to: OfferStatus,
    ) -> Result<u64> {
        transition(&mut *self.tx, id, from, to).await
    }
}
