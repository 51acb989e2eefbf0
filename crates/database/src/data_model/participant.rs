use async_trait::async_trait;
use carpool::database::{ParticipantRepo, Result};
use chrono::{DateTime, Utc};
use model::{
    participant::{
        Participant, ParticipantRole, ParticipantStatus, PaymentStatus, PayoutStatus,
    },
    trip::{Location, Trip},
    user::User,
    WithId,
};
use sqlx::prelude::FromRow;
use utility::id::Id;

use crate::{
    queries::participant::{
        apply_payment_transition, for_trip, for_user, get, insert, record_rating,
        set_payment_intent, transition,
    },
    PgDatabaseAutocommit, PgDatabaseTransaction,
};

use super::{decode_text, DatabaseRow};

#[derive(Debug, Clone, FromRow)]
pub struct ParticipantRow {
    pub id: String,
    pub trip_id: String,
    pub user_id: String,
    pub role: String,
    pub status: String,
    pub seats_held: i32,
    pub pickup_lat: Option<f64>,
    pub pickup_lng: Option<f64>,
    pub pickup_address: Option<String>,
    pub dropoff_lat: Option<f64>,
    pub dropoff_lng: Option<f64>,
    pub dropoff_address: Option<String>,
    pub payment_intent_id: Option<String>,
    pub payment_status: String,
    pub payment_completed_at: Option<DateTime<Utc>>,
    pub payout_status: String,
    pub rating: Option<i32>,
    pub encrypted_review: Option<Vec<u8>>,
    pub requested_at: DateTime<Utc>,
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

impl DatabaseRow for ParticipantRow {
    type Model = Participant;

    fn get_id(&self) -> Id<Self::Model> {
        Id::new(self.id.clone())
    }

    fn to_model(self) -> Result<Participant> {
        Ok(Participant {
            trip_id: Id::new(self.trip_id),
            user_id: Id::new(self.user_id),
            role: decode_text::<ParticipantRole>("role", &self.role)?,
            status: decode_text::<ParticipantStatus>("status", &self.status)?,
            seats_held: self.seats_held,
            pickup: location_from(self.pickup_lat, self.pickup_lng, self.pickup_address),
            dropoff: location_from(
                self.dropoff_lat,
                self.dropoff_lng,
                self.dropoff_address,
            ),
            payment_intent_id: self.payment_intent_id,
            payment_status: decode_text::<PaymentStatus>(
                "payment_status",
                &self.payment_status,
            )?,
            payment_completed_at: self.payment_completed_at,
            payout_status: decode_text::<PayoutStatus>(
                "payout_status",
                &self.payout_status,
            )?,
            rating: self.rating,
            encrypted_review: self.encrypted_review,
            requested_at: self.requested_at,
        })
    }
}

#[async_trait]
impl ParticipantRepo for PgDatabaseAutocommit {
    async fn insert_participant(
        &mut self,
        participant: Participant,
    ) -> Result<WithId<Participant>> {
        insert(&self.pool, participant).await
    }

    async fn get_participant(
        &mut self,
        id: &Id<Participant>,
    ) -> Result<WithId<Participant>> {
        get(&self.pool, id).await
    }

    async fn participant_for_user(
        &mut self,
        trip_id: &Id<Trip>,
        user_id: &Id<User>,
    ) -> Result<Option<WithId<Participant>>> {
        for_user(&self.pool, trip_id, user_id).await
    }

    async fn participants_for_trip(
        &mut self,
        trip_id: &Id<Trip>,
    ) -> Result<Vec<WithId<Participant>>> {
        for_trip(&self.pool, trip_id).await
    }

    async fn transition_participant(
        &mut self,
        id: &Id<Participant>,
        from: &[ParticipantStatus],
        to: ParticipantStatus,
    ) -> Result<u64> {
        transition(&self.pool, id, from, to).await
    }

    async fn set_payment_intent(
        &mut self,
        id: &Id<Participant>,
        intent_id: &str,
    ) -> Result<u64> {
        set_payment_intent(&self.pool, id, intent_id).await
    }

    async fn apply_payment_transition(
        &mut self,
        id: &Id<Participant>,
        intent_id: &str,
        from: &[PaymentStatus],
        to: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        apply_payment_transition(&self.pool, id, intent_id, from, to, completed_at)
            .await
    }

    async fn record_rating(
        &mut self,
        id: &Id<Participant>,
        rating: i32,
        encrypted_review: Option<Vec<u8>>,
    ) -> Result<u64> {
        record_rating(&self.pool, id, rating, encrypted_review).await
    }
}

#[async_trait]
impl<'a> ParticipantRepo for PgDatabaseTransaction<'a> {
    async fn insert_participant(
        &mut self,
        participant: Participant,
    ) -> Result<WithId<Participant>> {
        insert(&mut *self.tx, participant).await
    }

    async fn get_participant(
        &mut self,
        id: &Id<Participant>,
    ) -> Result<WithId<Participant>> {
        get(&mut *self.tx, id).await
    }

    async fn participant_for_user(
        &mut self,
        trip_id: &Id<Trip>,
        user_id: &Id<User>,
    ) -> Result<Option<WithId<Participant>>> {
        for_user(&mut *self.tx, trip_id, user_id).await
    }

    async fn participants_for_trip(
        &mut self,
        trip_id: &Id<Trip>,
    ) -> Result<Vec<WithId<Participant>>> {
        for_trip(&mut *self.tx, trip_id).await
    }

    async fn transition_participant(
        &mut self,
        id: &Id<Participant>,
        from: &[ParticipantStatus],
        to: ParticipantStatus,
    ) -> Result<u64> {
        transition(&mut *self.tx, id, from, to).await
    }

    async fn set_payment_intent(
        &mut self,
        id: &Id<Participant>,
        intent_id: &str,
    ) -> Result<u64> {
        set_payment_intent(&mut *self.tx, id, intent_id).await
    }

    async fn apply_payment_transition(
        &mut self,
        id: &Id<Participant>,
        intent_id: &str,
        from: &[PaymentStatus],
        to: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        apply_payment_transition(&mut *self.tx, id, intent_id, from, to, completed_at)
            .await
    }

    async fn record_rating(
        &mut self,
        id: &Id<Participant>,
        rating: i32,
        encrypted_review: Option<Vec<u8>>,
    ) -> Result<u64> {
        record_rating(&mut *self.tx, id, rating, encrypted_review).await
    }
}
