use std::{error, result};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{
    audit::AuditLogEntry,
    driver_trip::{DriverTrip, OfferStatus},
    ledger::IdempotencyRecord,
    matching::{MatchConfig, MatchResult, MatchStatus},
    notification::Notification,
    participant::{Participant, ParticipantStatus, PaymentStatus},
    pool::PoolAssignment,
    rider_request::{RequestStatus, RiderRequest},
    session::Session,
    trip::{Trip, TripStatus},
    user::User,
    waitlist::WaitlistEntry,
    WithId,
};
use utility::{geo::Point, id::Id};

#[derive(Debug)]
pub enum DatabaseError {
    NotFound,
    IdMissing,
    /// A uniqueness or guard predicate rejected the write.
    Conflict(String),
    Other(Box<dyn error::Error + Send + Sync>),
}

impl DatabaseError {
    pub fn other<E>(why: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(why))
    }
}

pub type Result<T> = result::Result<T, DatabaseError>;

#[async_trait]
pub trait UserRepo {
    async fn insert_user(&mut self, user: User) -> Result<WithId<User>>;
    async fn get_user(&mut self, id: &Id<User>) -> Result<WithId<User>>;
    async fn user_by_email_hash(
        &mut self,
        email_lookup_hash: &str,
    ) -> Result<Option<WithId<User>>>;

    /// Recomputes the driver's aggregate rating from completed trip reviews
    /// and stores it. Returns the new value, if any ratings exist.
    async fn recompute_driver_rating(
        &mut self,
        driver_id: &Id<User>,
    ) -> Result<Option<f64>>;
}

#[async_trait]
pub trait TripRepo {
    async fn insert_trip(&mut self, trip: Trip) -> Result<WithId<Trip>>;
    async fn get_trip(&mut self, id: &Id<Trip>) -> Result<WithId<Trip>>;

    /// Atomically takes `seats` from the trip's availability. The predicate
    /// `available_seats >= seats` both enforces the precondition and
    /// serialises racing reservations; 0 rows affected means contention or
    /// insufficient seats.
    async fn reserve_seats(&mut self, id: &Id<Trip>, seats: i32) -> Result<u64>;

    /// Symmetric increment, capped at `total_seats`.
    async fn release_seats(&mut self, id: &Id<Trip>, seats: i32) -> Result<u64>;

    /// Guarded status change; 0 rows affected means the trip was not in any
    /// of the `from` states.
    async fn transition_trip(
        &mut self,
        id: &Id<Trip>,
        from: &[TripStatus],
        to: TripStatus,
    ) -> Result<u64>;

    async fn find_available_trips(
        &mut self,
        pickup: Point,
        radius_km: f64,
        departure_after: DateTime<Utc>,
        seats: i32,
    ) -> Result<Vec<WithId<Trip>>>;
}

#[async_trait]
pub trait ParticipantRepo {
    /// Fails with `Conflict` when the `(trip_id, user_id)` pair already
    /// exists.
    async fn insert_participant(
        &mut self,
        participant: Participant,
    ) -> Result<WithId<Participant>>;

    async fn get_participant(
        &mut self,
        id: &Id<Participant>,
    ) -> Result<WithId<Participant>>;

    async fn participant_for_user(
        &mut self,
        trip_id: &Id<Trip>,
        user_id: &Id<User>,
    ) -> Result<Option<WithId<Participant>>>;

    async fn participants_for_trip(
        &mut self,
        trip_id: &Id<Trip>,
    ) -> Result<Vec<WithId<Participant>>>;

    /// Guarded status change. Accept/reject/cancel races for the same
    /// participant are decided by whose UPDATE matches the `from` set first.
    async fn transition_participant(
        &mut self,
        id: &Id<Participant>,
        from: &[ParticipantStatus],
        to: ParticipantStatus,
    ) -> Result<u64>;

    /// Attaches a payment intent and moves payment status to `pending`,
    /// unless another writer already did.
    async fn set_payment_intent(
        &mut self,
        id: &Id<Participant>,
        intent_id: &str,
    ) -> Result<u64>;

    /// Guarded payment-status change, additionally scoped to the intent the
    /// event refers to so stale webhooks drop out.
    async fn apply_payment_transition(
        &mut self,
        id: &Id<Participant>,
        intent_id: &str,
        from: &[PaymentStatus],
        to: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64>;

    /// Writes a rating and encrypted review once; 0 rows affected when the
    /// participant is not completed or already rated.
    async fn record_rating(
        &mut self,
        id: &Id<Participant>,
        rating: i32,
        encrypted_review: Option<Vec<u8>>,
    ) -> Result<u64>;
}

#[async_trait]
pub trait WaitlistRepo {
    async fn join_waitlist(
        &mut self,
        entry: WaitlistEntry,
    ) -> Result<WithId<WaitlistEntry>>;

    /// Oldest `waiting` entry needing at most `max_seats`, FIFO by
    /// `joined_at`.
    async fn oldest_waiting(
        &mut self,
        trip_id: &Id<Trip>,
        max_seats: i32,
    ) -> Result<Option<WithId<WaitlistEntry>>>;

    async fn promote_waitlist_entry(
        &mut self,
        id: &Id<WaitlistEntry>,
    ) -> Result<u64>;
}

#[async_trait]
pub trait DriverTripRepo {
    async fn insert_driver_trip(
        &mut self,
        trip: DriverTrip,
    ) -> Result<WithId<DriverTrip>>;

    async fn get_driver_trip(
        &mut self,
        id: &Id<DriverTrip>,
    ) -> Result<WithId<DriverTrip>>;

    /// Phase A pre-filter: one SQL predicate over status, seats, the
    /// slack-padded departure window and the offer's bounding box.
    async fn find_candidate_drivers(
        &mut self,
        request: &RiderRequest,
        config: &MatchConfig,
    ) -> Result<Vec<WithId<DriverTrip>>>;

    /// Takes seats from the offer when a match is confirmed.
    async fn reserve_offer_seats(
        &mut self,
        id: &Id<DriverTrip>,
        seats: i32,
    ) -> Result<u64>;

    async fn transition_offer(
        &mut self,
        id: &Id<DriverTrip>,
        from: &[OfferStatus],
        to: OfferStatus,
    ) -> Result<u64>;
}

#[async_trait]
pub trait RiderRequestRepo {
    async fn insert_rider_request(
        &mut self,
        request: RiderRequest,
    ) -> Result<WithId<RiderRequest>>;

    async fn get_rider_request(
        &mut self,
        id: &Id<RiderRequest>,
    ) -> Result<WithId<RiderRequest>>;

    async fn pending_rider_requests(
        &mut self,
        limit: usize,
    ) -> Result<Vec<WithId<RiderRequest>>>;

    async fn transition_rider_request(
        &mut self,
        id: &Id<RiderRequest>,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<u64>;

    async fn set_matched_trip(
        &mut self,
        id: &Id<RiderRequest>,
        driver_trip_id: Option<&Id<DriverTrip>>,
    ) -> Result<()>;
}

#[async_trait]
pub trait MatchRepo {
    /// Idempotent on `(driver_trip_id, rider_request_id)`: re-running the
    /// matcher refreshes score fields but keeps id, status and creation time.
    async fn upsert_match(
        &mut self,
        result: MatchResult,
    ) -> Result<WithId<MatchResult>>;

    async fn get_match(
        &mut self,
        id: &Id<MatchResult>,
    ) -> Result<WithId<MatchResult>>;

    async fn matches_for_request(
        &mut self,
        request_id: &Id<RiderRequest>,
    ) -> Result<Vec<WithId<MatchResult>>>;

    async fn pending_matches_for_driver_trip(
        &mut self,
        driver_trip_id: &Id<DriverTrip>,
    ) -> Result<Vec<WithId<MatchResult>>>;

    async fn transition_match(
        &mut self,
        id: &Id<MatchResult>,
        from: &[MatchStatus],
        to: MatchStatus,
    ) -> Result<u64>;
}

#[async_trait]
pub trait PoolRepo {
    /// Persists the assignment and its members atomically.
    async fn insert_pool(
        &mut self,
        pool: PoolAssignment,
    ) -> Result<WithId<PoolAssignment>>;

    async fn pool_for_driver_trip(
        &mut self,
        driver_trip_id: &Id<DriverTrip>,
    ) -> Result<Option<WithId<PoolAssignment>>>;
}

#[async_trait]
pub trait MatchConfigRepo {
    async fn get_match_config(
        &mut self,
        tenant: &str,
    ) -> Result<Option<MatchConfig>>;

    async fn put_match_config(
        &mut self,
        tenant: &str,
        config: &MatchConfig,
    ) -> Result<()>;
}

#[async_trait]
pub trait PolylineRepo {
    async fn cached_polyline(
        &mut self,
        origin: Point,
        destination: Point,
    ) -> Result<Option<String>>;

    async fn put_cached_polyline(
        &mut self,
        origin: Point,
        destination: Point,
        polyline: &str,
    ) -> Result<()>;
}

#[async_trait]
pub trait SessionRepo {
    async fn insert_session(&mut self, session: Session) -> Result<WithId<Session>>;

    async fn session_by_token_hash(
        &mut self,
        refresh_token_hash: &str,
    ) -> Result<Option<WithId<Session>>>;

    /// Rotates the refresh-token hash. The old hash is part of the
    /// predicate, so a concurrently rotated (or replayed) token affects 0
    /// rows.
    async fn rotate_session(
        &mut self,
        id: &Id<Session>,
        old_hash: &str,
        new_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn deactivate_session_by_hash(
        &mut self,
        refresh_token_hash: &str,
    ) -> Result<u64>;

    async fn purge_expired_sessions(&mut self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait LedgerRepo {
    /// Insert-or-ignore; the first writer wins and later snapshots for the
    /// same key are discarded.
    async fn put_idempotency_record(
        &mut self,
        key: &str,
        snapshot: &serde_json::Value,
    ) -> Result<()>;

    async fn get_idempotency_record(
        &mut self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>>;

    /// Returns 0 when the event id was already recorded.
    async fn record_webhook_event(
        &mut self,
        event_id: &str,
        event_type: &str,
    ) -> Result<u64>;

    async fn webhook_event_seen(&mut self, event_id: &str) -> Result<bool>;

    async fn purge_webhook_events(
        &mut self,
        older_than: DateTime<Utc>,
    ) -> Result<u64>;
}

#[async_trait]
pub trait NotificationRepo {
    async fn insert_notification(
        &mut self,
        notification: Notification,
    ) -> Result<WithId<Notification>>;
}

#[async_trait]
pub trait AuditRepo {
    async fn insert_audit_log(
        &mut self,
        entry: AuditLogEntry,
    ) -> Result<WithId<AuditLogEntry>>;
}

pub trait DatabaseOperations:
    UserRepo
    + TripRepo
    + ParticipantRepo
    + WaitlistRepo
    + DriverTripRepo
    + RiderRequestRepo
    + MatchRepo
    + PoolRepo
    + MatchConfigRepo
    + PolylineRepo
    + SessionRepo
    + LedgerRepo
    + NotificationRepo
    + AuditRepo
{
}

#[async_trait]
pub trait DatabaseTransaction: DatabaseOperations {
    async fn commit(self) -> Result<()>;
}

pub trait DatabaseAutocommit: DatabaseOperations {}

/// Trait to implement the carpool store. Multiple concurrent accesses are
/// possible by cloning the database object; most writes go through the
/// autocommit handle because a single conditional UPDATE is the predominant
/// serialisation pattern.
#[async_trait]
pub trait Database: Clone + Send + Sync + Sized {
    type Transaction: DatabaseTransaction + Send;
    type Autocommit: DatabaseAutocommit + Send;

    async fn transaction(&self) -> Result<Self::Transaction>;

    fn auto(&self) -> Self::Autocommit;
}
