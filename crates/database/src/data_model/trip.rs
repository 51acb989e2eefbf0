use async_trait::async_trait;
use carpool::database::{Result, TripRepo};
use chrono::{DateTime, Utc};
use model::{
    trip::{Location, Trip, TripStatus, Vehicle},
    WithId,
};
use sqlx::prelude::FromRow;
use utility::{geo::Point, id::Id};

use crate::{
    queries::trip::{
        find_available, get, insert, release_seats, reserve_seats, transition,
    },
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

use super::{decode_json, decode_text, DatabaseRow};

#[derive(Debug, Clone, FromRow)]
pub struct TripRow {
    pub id: String,
    pub driver_id: String,
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub origin_address: Option<String>,
    pub destination_lat: f64,
    pub destination_lng: f64,
    pub destination_address: Option<String>,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub total_seats: i32,
    pub available_seats: i32,
    pub price_per_seat: f64,
    pub currency: String,
    pub vehicle_json: sqlx::types::Json<serde_json::Value>,
    pub status: String,
}

impl DatabaseRow for TripRow {
    type Model = Trip;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id.clone())
    }

    fn to_model(self) -> Result<Trip> {
        Ok(Trip {
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
            departure_time: self.departure_time,
            arrival_time: self.arrival_time,
            total_seats: self.total_seats,
            available_seats: self.available_seats,
            price_per_seat: self.price_per_seat,
            currency: self.currency,
            vehicle: decode_json::<Vehicle>("vehicle_json", self.vehicle_json.0)?,
            status: decode_text::<TripStatus>("status", &self.status)?,
        })
    }
}

#[async_trait]
impl TripRepo for PgDatabaseAutocommit {
    async fn insert_trip(&mut self, trip: Trip) -> Result<WithId<Trip>> {
        insert(&self.pool, trip).await
    }

    async fn get_trip(&mut self, id: &Id<Trip>) -> Result<WithId<Trip>> {
        get(&self.pool, id).await
    }

    async fn reserve_seats(&mut self, id: &Id<Trip>, seats: i32) -> Result<u64> {
        reserve_seats(&self.pool, id, seats).await
    }

    async fn release_seats(&mut self, id: &Id<Trip>, seats: i32) -> Result<u64> {
        release_seats(&self.pool, id, seats).await
    }

    async fn transition_trip(
        &mut self,
        id: &Id<Trip>,
        from: &[TripStatus],
        to: TripStatus,
    ) -> Result<u64> {
        transition(&self.pool, id, from, to).await
    }

    async fn find_available_trips(
        &mut self,
        pickup: Point,
        radius_km: f64,
        departure_after: DateTime<Utc>,
        seats: i32,
    ) -> Result<Vec<WithId<Trip>>> {
        find_available(&self.pool, pickup, radius_km, departure_after, seats).await
    }
}

#[async_trait]
impl<'a> TripRepo for PgDatabaseTransaction<'a> {
    async fn insert_trip(&mut self, trip: Trip) -> Result<WithId<Trip>> {
        insert(&mut *self.tx, trip).await
    }

    async fn get_trip(&mut self, id: &Id<Trip>) -> Result<WithId<Trip>> {
        get(&mut *self.tx, id).await
    }

    async fn reserve_seats(&mut self, id: &Id<Trip>, seats: i32) -> Result<u64> {
        reserve_seats(&mut *self.tx, id, seats).await
    }

    async fn release_seats(&mut self, id: &Id<Trip>, seats: i32) -> Result<u64> {
        release_seats(&mut *self.tx, id, seats).await
    }

    async fn transition_trip(
        &mut self,
        id: &Id<Trip>,
        from: &[TripStatus],
        to: TripStatus,
    ) -> Result<u64> {
        transition(&mut *self.tx, id, from, to).await
    }

    async fn find_available_trips(
        &mut self,
        pickup: Point,
        radius_km: f64,
        departure_after: DateTime<Utc>,
        seats: i32,
    ) -> Result<Vec<WithId<Trip>>> {
        find_available(&mut *self.tx, pickup, radius_km, departure_after, seats).await
    }
}
