use async_trait::async_trait;
use carpool::database::{Result, WaitlistRepo};
use chrono::{DateTime, Utc};
use model::{
    trip::{Location, Trip},
    waitlist::{WaitlistEntry, WaitlistStatus},
    WithId,
};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::{
    queries::waitlist::{join, oldest_waiting, promote},
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

use super::{decode_text, DatabaseRow};

#[derive(Debug, Clone, FromRow)]
pub struct WaitlistRow {
    pub id: String,
    pub trip_id: String,
    pub user_id: String,
    pub seats_needed: i32,
    pub pickup_lat: Option<f64>,
    pub pickup_lng: Option<f64>,
    pub pickup_address: Option<String>,
    pub dropoff_lat: Option<f64>,
    pub dropoff_lng: Option<f64>,
    pub dropoff_address: Option<String>,
    pub status: String,
    pub joined_at: DateTime<Utc>,
}

fn location_from(
    lat: Option<f64>,
    lng: Option<f64>,
    address: Option<String>,
) -> Option<Location> {
    Some(Location {
        latitude: lat?,
        longitude: lng?,
        address,
    })
}

impl DatabaseRow for WaitlistRow {
    type Model = WaitlistEntry;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id.clone())
    }

    fn to_model(self) -> Result<WaitlistEntry> {
        Ok(WaitlistEntry {
            trip_id: Id::new(self.trip_id),
            user_id: Id::new(self.user_id),
            seats_needed: self.seats_needed,
            pickup: location_from(self.pickup_lat, self.pickup_lng, self.pickup_address),
            dropoff: location_from(
                self.dropoff_lat,
                self.dropoff_lng,
                self.dropoff_address,
            ),
            status: decode_text::<WaitlistStatus>("status", &self.status)?,
            joined_at: self.joined_at,
        })
    }
}

#[async_trait]
impl WaitlistRepo for PgDatabaseAutocommit {
    async fn join_waitlist(
        &mut self,
        entry: WaitlistEntry,
    ) -> Result<WithId<WaitlistEntry>> {
        join(&self.pool, entry).await
    }

    async fn oldest_waiting(
        &mut self,
        trip_id: &Id<Trip>,
        max_seats: i32,
    ) -> Result<Option<WithId<WaitlistEntry>>> {
        oldest_waiting(&self.pool, trip_id, max_seats).await
    }

    async fn promote_waitlist_entry(&mut self, id: &Id<WaitlistEntry>) -> Result<u64> {
        promote(&self.pool, id).await
    }
}

#[async_trait]
impl<'a> WaitlistRepo for PgDatabaseTransaction<'a> {
    async fn join_waitlist(
        &mut self,
        entry: WaitlistEntry,
    ) -> Result<WithId<WaitlistEntry>> {
        join(&mut *self.tx, entry).await
    }

    async fn oldest_waiting(
        &mut self,
        trip_id: &Id<Trip>,
        max_seats: i32,
    ) -> Result<Option<WithId<WaitlistEntry>>> {
        oldest_waiting(&mut *self.tx, trip_id, max_seats).await
    }

    async fn promote_waitlist_entry(&mut self, id: &Id<WaitlistEntry>) -> Result<u64> {
        promote(&mut *self.tx, id).await
    }
}
