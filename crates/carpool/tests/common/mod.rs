//! In-memory implementations of the storage traits and collaborator
//! contracts, mirroring the guarded-update semantics of the SQL layer so
//! the services can be exercised end to end without a database server.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use carpool::{
    crypto::{CryptoError, CryptoService},
    database::{
        AuditRepo, Database, DatabaseAutocommit, DatabaseError, DatabaseOperations,
        DatabaseTransaction, DriverTripRepo, LedgerRepo, MatchConfigRepo, MatchRepo,
        NotificationRepo, ParticipantRepo, PolylineRepo, PoolRepo, Result,
        RiderRequestRepo, SessionRepo, TripRepo, UserRepo, WaitlistRepo,
    },
    payment_provider::{IntentRequest, PaymentIntent, PaymentProvider},
};
use chrono::{DateTime, Duration, Utc};
use model::{
    audit::AuditLogEntry,
    driver_trip::{DriverTrip, OfferStatus},
    ledger::{IdempotencyRecord, WebhookEvent},
    matching::{MatchConfig, MatchResult, MatchStatus},
    notification::Notification,
    participant::{Participant, ParticipantStatus, PaymentStatus},
    pool::PoolAssignment,
    rider_request::{RequestStatus, RiderRequest},
    session::Session,
    trip::{Trip, TripStatus},
    user::{NotificationPrefs, Role, User, UserFlags},
    waitlist::{WaitlistEntry, WaitlistStatus},
    WithId,
};
use utility::{
    geo::{self, Point},
    id::Id,
};

#[derive(Default)]
pub struct MemStore {
    users: HashMap<String, User>,
    trips: HashMap<String, Trip>,
    participants: HashMap<String, Participant>,
    waitlist: HashMap<String, WaitlistEntry>,
    driver_trips: HashMap<String, DriverTrip>,
    rider_requests: HashMap<String, RiderRequest>,
    matches: HashMap<String, MatchResult>,
    pools: HashMap<String, PoolAssignment>,
    configs: HashMap<String, MatchConfig>,
    polylines: HashMap<(String, String), String>,
    sessions: HashMap<String, Session>,
    idempotency: HashMap<String, IdempotencyRecord>,
    webhook_events: HashMap<String, WebhookEvent>,
    pub notifications: Vec<Notification>,
    pub audits: Vec<AuditLogEntry>,
    next_id: u64,
}

impl MemStore {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

#[derive(Clone, Default)]
pub struct MemDatabase {
    store: Arc<Mutex<MemStore>>,
}

impl MemDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&mut MemStore) -> R) -> R {
        f(&mut self.store.lock().unwrap())
    }

    /// Seat conservation (§ invariants): accepted seats + availability must
    /// always equal the trip's capacity.
    pub fn assert_seat_conservation(&self, trip_id: &Id<Trip>) {
        self.with_store(|store| {
            let trip = store.trips.get(&trip_id.raw()).expect("trip exists");
            let held: i32 = store
                .participants
                .values()
                .filter(|participant| {
                    participant.trip_id == *trip_id
                        && participant.status == ParticipantStatus::Accepted
                })
                .map(|participant| participant.seats_held)
                .sum();
            assert_eq!(
                held + trip.available_seats,
                trip.total_seats,
                "seat conservation violated for {}",
                trip_id
            );
        });
    }
}

pub struct MemHandle {
    store: Arc<Mutex<MemStore>>,
}

impl DatabaseOperations for MemHandle {}
impl DatabaseAutocommit for MemHandle {}

#[async_trait]
impl DatabaseTransaction for MemHandle {
    async fn commit(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Database for MemDatabase {
    type Transaction = MemHandle;
    type Autocommit = MemHandle;

    async fn transaction(&self) -> Result<Self::Transaction> {
        Ok(MemHandle {
            store: self.store.clone(),
        })
    }

    fn auto(&self) -> Self::Autocommit {
        MemHandle {
            store: self.store.clone(),
        }
    }
}

impl MemHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, MemStore> {
        self.store.lock().unwrap()
    }
}

#[async_trait]
impl UserRepo for MemHandle {
    async fn insert_user(&mut self, user: User) -> Result<WithId<User>> {
        let mut store = self.lock();
        let id = store.mint("user");
        store.users.insert(id.clone(), user.clone());
        Ok(WithId::new(Id::new(id), user))
    }

    async fn get_user(&mut self, id: &Id<User>) -> Result<WithId<User>> {
        self.lock()
            .users
            .get(&id.raw())
            .cloned()
            .map(|user| WithId::new(id.clone(), user))
            .ok_or(DatabaseError::NotFound)
    }

    async fn user_by_email_hash(
        &mut self,
        email_lookup_hash: &str,
    ) -> Result<Option<WithId<User>>> {
        Ok(self.lock().users.iter().find_map(|(id, user)| {
            (user.email_lookup_hash == email_lookup_hash)
                .then(|| WithId::new(Id::new(id.clone()), user.clone()))
        }))
    }

    async fn recompute_driver_rating(
        &mut self,
        driver_id: &Id<User>,
    ) -> Result<Option<f64>> {
        let mut store = self.lock();
        let trip_ids: Vec<String> = store
            .trips
            .iter()
            .filter(|(_, trip)| trip.driver_id == *driver_id)
            .map(|(id, _)| id.clone())
            .collect();
        let ratings: Vec<i32> = store
            .participants
            .values()
            .filter(|participant| {
                trip_ids.contains(&participant.trip_id.raw())
                    && participant.rating.is_some()
            })
            .filter_map(|participant| participant.rating)
            .collect();
        let average = (!ratings.is_empty())
            .then(|| ratings.iter().sum::<i32>() as f64 / ratings.len() as f64);
        if let Some(user) = store.users.get_mut(&driver_id.raw()) {
            user.rating = average;
        }
        Ok(average)
    }
}

#[async_trait]
impl TripRepo for MemHandle {
    async fn insert_trip(&mut self, trip: Trip) -> Result<WithId<Trip>> {
        let mut store = self.lock();
        let id = store.mint("trip");
        store.trips.insert(id.clone(), trip.clone());
        Ok(WithId::new(Id::new(id), trip))
    }

    async fn get_trip(&mut self, id: &Id<Trip>) -> Result<WithId<Trip>> {
        self.lock()
            .trips
            .get(&id.raw())
            .cloned()
            .map(|trip| WithId::new(id.clone(), trip))
            .ok_or(DatabaseError::NotFound)
    }

    async fn reserve_seats(&mut self, id: &Id<Trip>, seats: i32) -> Result<u64> {
        let mut store = self.lock();
        match store.trips.get_mut(&id.raw()) {
            Some(trip) if trip.available_seats >= seats => {
                trip.available_seats -= seats;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn release_seats(&mut self, id: &Id<Trip>, seats: i32) -> Result<u64> {
        let mut store = self.lock();
        match store.trips.get_mut(&id.raw()) {
            Some(trip) => {
                trip.available_seats = (trip.available_seats + seats).min(trip.total_seats);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn transition_trip(
        &mut self,
        id: &Id<Trip>,
        from: &[TripStatus],
        to: TripStatus,
    ) -> Result<u64> {
        let mut store = self.lock();
        match store.trips.get_mut(&id.raw()) {
            Some(trip) if from.contains(&trip.status) => {
                trip.status = to;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn find_available_trips(
        &mut self,
        pickup: Point,
        radius_km: f64,
        departure_after: DateTime<Utc>,
        seats: i32,
    ) -> Result<Vec<WithId<Trip>>> {
        let bbox = geo::bounding_box(&[pickup], radius_km);
        let mut found: Vec<WithId<Trip>> = self
            .lock()
            .trips
            .iter()
            .filter(|(_, trip)| {
                trip.status == TripStatus::Scheduled
                    && trip.available_seats >= seats
                    && trip.departure_time >= departure_after
                    && bbox.contains(trip.origin.point())
            })
            .map(|(id, trip)| WithId::new(Id::new(id.clone()), trip.clone()))
            .collect();
        found.sort_by_key(|trip| trip.content.departure_time);
        Ok(found)
    }
}

#[async_trait]
impl ParticipantRepo for MemHandle {
    async fn insert_participant(
        &mut self,
        participant: Participant,
    ) -> Result<WithId<Participant>> {
        let mut store = self.lock();
        let duplicate = store.participants.values().any(|existing| {
            existing.trip_id == participant.trip_id
                && existing.user_id == participant.user_id
        });
        if duplicate {
            return Err(DatabaseError::Conflict(
                "duplicate (trip_id, user_id)".to_owned(),
            ));
        }
        let id = store.mint("participant");
        store.participants.insert(id.clone(), participant.clone());
        Ok(WithId::new(Id::new(id), participant))
    }

    async fn get_participant(
        &mut self,
        id: &Id<Participant>,
    ) -> Result<WithId<Participant>> {
        self.lock()
            .participants
            .get(&id.raw())
            .cloned()
            .map(|participant| WithId::new(id.clone(), participant))
            .ok_or(DatabaseError::NotFound)
    }

    async fn participant_for_user(
        &mut self,
        trip_id: &Id<Trip>,
        user_id: &Id<User>,
    ) -> Result<Option<WithId<Participant>>> {
        Ok(self.lock().participants.iter().find_map(|(id, participant)| {
            (participant.trip_id == *trip_id && participant.user_id == *user_id)
                .then(|| WithId::new(Id::new(id.clone()), participant.clone()))
        }))
    }

    async fn participants_for_trip(
        &mut self,
        trip_id: &Id<Trip>,
    ) -> Result<Vec<WithId<Participant>>> {
        let mut found: Vec<WithId<Participant>> = self
            .lock()
            .participants
            .iter()
            .filter(|(_, participant)| participant.trip_id == *trip_id)
            .map(|(id, participant)| {
                WithId::new(Id::new(id.clone()), participant.clone())
            })
            .collect();
        found.sort_by_key(|participant| participant.content.requested_at);
        Ok(found)
    }

    async fn transition_participant(
        &mut self,
        id: &Id<Participant>,
        from: &[ParticipantStatus],
        to: ParticipantStatus,
    ) -> Result<u64> {
        let mut store = self.lock();
        match store.participants.get_mut(&id.raw()) {
            Some(participant) if from.contains(&participant.status) => {
                participant.status = to;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn set_payment_intent(
        &mut self,
        id: &Id<Participant>,
        intent_id: &str,
    ) -> Result<u64> {
        let mut store = self.lock();
        match store.participants.get_mut(&id.raw()) {
            Some(participant)
                if participant.payment_intent_id.is_none()
                    || participant.payment_status != PaymentStatus::Pending =>
            {
                participant.payment_intent_id = Some(intent_id.to_owned());
                participant.payment_status = PaymentStatus::Pending;
                Ok(1)
            }
            Some(_) => Ok(0),
            None => Ok(0),
        }
    }

    async fn apply_payment_transition(
        &mut self,
        id: &Id<Participant>,
        intent_id: &str,
        from: &[PaymentStatus],
        to: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let mut store = self.lock();
        match store.participants.get_mut(&id.raw()) {
            Some(participant)
                if participant.payment_intent_id.as_deref() == Some(intent_id)
                    && from.contains(&participant.payment_status) =>
            {
                participant.payment_status = to;
                if completed_at.is_some() {
                    participant.payment_completed_at = completed_at;
                }
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn record_rating(
        &mut self,
        id: &Id<Participant>,
        rating: i32,
        encrypted_review: Option<Vec<u8>>,
    ) -> Result<u64> {
        let mut store = self.lock();
        match store.participants.get_mut(&id.raw()) {
            Some(participant)
                if participant.status == ParticipantStatus::Completed
                    && participant.rating.is_none() =>
            {
                participant.rating = Some(rating);
                participant.encrypted_review = encrypted_review;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl WaitlistRepo for MemHandle {
    async fn join_waitlist(
        &mut self,
        entry: WaitlistEntry,
    ) -> Result<WithId<WaitlistEntry>> {
        let mut store = self.lock();
        let id = store.mint("waitlist");
        store.waitlist.insert(id.clone(), entry.clone());
        Ok(WithId::new(Id::new(id), entry))
    }

    async fn oldest_waiting(
        &mut self,
        trip_id: &Id<Trip>,
        max_seats: i32,
    ) -> Result<Option<WithId<WaitlistEntry>>> {
        let store = self.lock();
        let mut waiting: Vec<(&String, &WaitlistEntry)> = store
            .waitlist
            .iter()
            .filter(|(_, entry)| {
                entry.trip_id == *trip_id
                    && entry.status == WaitlistStatus::Waiting
                    && entry.seats_needed <= max_seats
            })
            .collect();
        waiting.sort_by_key(|(_, entry)| entry.joined_at);
        Ok(waiting.first().map(|(id, entry)| {
            WithId::new(Id::new((*id).clone()), (*entry).clone())
        }))
    }

    async fn promote_waitlist_entry(&mut self, id: &Id<WaitlistEntry>) -> Result<u64> {
        let mut store = self.lock();
        match store.waitlist.get_mut(&id.raw()) {
            Some(entry) if entry.status == WaitlistStatus::Waiting => {
                entry.status = WaitlistStatus::Promoted;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl DriverTripRepo for MemHandle {
    async fn insert_driver_trip(
        &mut self,
        trip: DriverTrip,
    ) -> Result<WithId<DriverTrip>> {
        let mut store = self.lock();
        let id = store.mint("offer");
        store.driver_trips.insert(id.clone(), trip.clone());
        Ok(WithId::new(Id::new(id), trip))
    }

    async fn get_driver_trip(
        &mut self,
        id: &Id<DriverTrip>,
    ) -> Result<WithId<DriverTrip>> {
        self.lock()
            .driver_trips
            .get(&id.raw())
            .cloned()
            .map(|trip| WithId::new(id.clone(), trip))
            .ok_or(DatabaseError::NotFound)
    }

    async fn find_candidate_drivers(
        &mut self,
        request: &RiderRequest,
        config: &MatchConfig,
    ) -> Result<Vec<WithId<DriverTrip>>> {
        let slack = Duration::minutes(config.time_slack_min);
        let earliest = request.earliest_departure - slack;
        let latest = request.latest_departure + slack;
        let pickup = request.pickup.point();
        let mid = request.mid_window();
        let mut found: Vec<WithId<DriverTrip>> = self
            .lock()
            .driver_trips
            .iter()
            .filter(|(_, trip)| {
                trip.status == OfferStatus::Offered
                    && trip.available_seats >= request.seats_needed
                    && trip.departure_time >= earliest
                    && trip.departure_time <= latest
                    && trip.bbox.contains(pickup)
            })
            .map(|(id, trip)| WithId::new(Id::new(id.clone()), trip.clone()))
            .collect();
        found.sort_by_key(|trip| {
            (trip.content.departure_time - mid).num_seconds().abs()
        });
        found.truncate(config.max_candidates);
        Ok(found)
    }

    async fn reserve_offer_seats(
        &mut self,
        id: &Id<DriverTrip>,
        seats: i32,
    ) -> Result<u64> {
        let mut store = self.lock();
        match store.driver_trips.get_mut(&id.raw()) {
            Some(trip) if trip.available_seats >= seats => {
                trip.available_seats -= seats;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn transition_offer(
        &mut self,
        id: &Id<DriverTrip>,
        from: &[OfferStatus],
        to: OfferStatus,
    ) -> Result<u64> {
        let mut store = self.lock();
        match store.driver_trips.get_mut(&id.raw()) {
            Some(trip) if from.contains(&trip.status) => {
                trip.status = to;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl RiderRequestRepo for MemHandle {
    async fn insert_rider_request(
        &mut self,
        request: RiderRequest,
    ) -> Result<WithId<RiderRequest>> {
        let mut store = self.lock();
        let id = store.mint("request");
        store.rider_requests.insert(id.clone(), request.clone());
        Ok(WithId::new(Id::new(id), request))
    }

    async fn get_rider_request(
        &mut self,
        id: &Id<RiderRequest>,
    ) -> Result<WithId<RiderRequest>> {
        self.lock()
            .rider_requests
            .get(&id.raw())
            .cloned()
            .map(|request| WithId::new(id.clone(), request))
            .ok_or(DatabaseError::NotFound)
    }

    async fn pending_rider_requests(
        &mut self,
        limit: usize,
    ) -> Result<Vec<WithId<RiderRequest>>> {
        let mut pending: Vec<WithId<RiderRequest>> = self
            .lock()
            .rider_requests
            .iter()
            .filter(|(_, request)| request.status == RequestStatus::Pending)
            .map(|(id, request)| WithId::new(Id::new(id.clone()), request.clone()))
            .collect();
        pending.sort_by_key(|request| request.content.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn transition_rider_request(
        &mut self,
        id: &Id<RiderRequest>,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<u64> {
        let mut store = self.lock();
        match store.rider_requests.get_mut(&id.raw()) {
            Some(request) if from.contains(&request.status) => {
                request.status = to;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn set_matched_trip(
        &mut self,
        id: &Id<RiderRequest>,
        driver_trip_id: Option<&Id<DriverTrip>>,
    ) -> Result<()> {
        let mut store = self.lock();
        if let Some(request) = store.rider_requests.get_mut(&id.raw()) {
            request.matched_trip_id = driver_trip_id.cloned();
        }
        Ok(())
    }
}

#[async_trait]
impl MatchRepo for MemHandle {
    async fn upsert_match(
        &mut self,
        result: MatchResult,
    ) -> Result<WithId<MatchResult>> {
        let mut store = self.lock();
        let existing = store.matches.iter().find_map(|(id, existing)| {
            (existing.driver_trip_id == result.driver_trip_id
                && existing.rider_request_id == result.rider_request_id)
                .then(|| id.clone())
        });
        match existing {
            Some(id) => {
                let kept = store.matches.get_mut(&id).unwrap();
                kept.score = result.score;
                kept.breakdown = result.breakdown;
                kept.estimated_pickup_time = result.estimated_pickup_time;
                kept.detour_minutes = result.detour_minutes;
                kept.pickup_distance_km = result.pickup_distance_km;
                kept.carbon_saved_kg = result.carbon_saved_kg;
                kept.explanation = result.explanation;
                Ok(WithId::new(Id::new(id.clone()), kept.clone()))
            }
            None => {
                let id = store.mint("match");
                store.matches.insert(id.clone(), result.clone());
                Ok(WithId::new(Id::new(id), result))
            }
        }
    }

    async fn get_match(&mut self, id: &Id<MatchResult>) -> Result<WithId<MatchResult>> {
        self.lock()
            .matches
            .get(&id.raw())
            .cloned()
            .map(|result| WithId::new(id.clone(), result))
            .ok_or(DatabaseError::NotFound)
    }

    async fn matches_for_request(
        &mut self,
        request_id: &Id<RiderRequest>,
    ) -> Result<Vec<WithId<MatchResult>>> {
        let mut found: Vec<WithId<MatchResult>> = self
            .lock()
            .matches
            .iter()
            .filter(|(_, result)| result.rider_request_id == *request_id)
            .map(|(id, result)| WithId::new(Id::new(id.clone()), result.clone()))
            .collect();
        found.sort_by(|a, b| a.content.score.total_cmp(&b.content.score));
        Ok(found)
    }

    async fn pending_matches_for_driver_trip(
        &mut self,
        driver_trip_id: &Id<DriverTrip>,
    ) -> Result<Vec<WithId<MatchResult>>> {
        let mut found: Vec<WithId<MatchResult>> = self
            .lock()
            .matches
            .iter()
            .filter(|(_, result)| {
                result.driver_trip_id == *driver_trip_id
                    && result.status == MatchStatus::Pending
            })
            .map(|(id, result)| WithId::new(Id::new(id.clone()), result.clone()))
            .collect();
        found.sort_by(|a, b| a.content.score.total_cmp(&b.content.score));
        Ok(found)
    }

    async fn transition_match(
        &mut self,
        id: &Id<MatchResult>,
        from: &[MatchStatus],
        to: MatchStatus,
    ) -> Result<u64> {
        let mut store = self.lock();
        match store.matches.get_mut(&id.raw()) {
            Some(result) if from.contains(&result.status) => {
                result.status = to;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl PoolRepo for MemHandle {
    async fn insert_pool(
        &mut self,
        pool: PoolAssignment,
    ) -> Result<WithId<PoolAssignment>> {
        let mut store = self.lock();
        let id = store.mint("pool");
        store.pools.insert(id.clone(), pool.clone());
        Ok(WithId::new(Id::new(id), pool))
    }

    async fn pool_for_driver_trip(
        &mut self,
        driver_trip_id: &Id<DriverTrip>,
    ) -> Result<Option<WithId<PoolAssignment>>> {
        Ok(self.lock().pools.iter().find_map(|(id, pool)| {
            (pool.driver_trip_id == *driver_trip_id)
                .then(|| WithId::new(Id::new(id.clone()), pool.clone()))
        }))
    }
}

#[async_trait]
impl MatchConfigRepo for MemHandle {
    async fn get_match_config(&mut self, tenant: &str) -> Result<Option<MatchConfig>> {
        Ok(self.lock().configs.get(tenant).cloned())
    }

    async fn put_match_config(
        &mut self,
        tenant: &str,
        config: &MatchConfig,
    ) -> Result<()> {
        self.lock().configs.insert(tenant.to_owned(), config.clone());
        Ok(())
    }
}

#[async_trait]
impl PolylineRepo for MemHandle {
    async fn cached_polyline(
        &mut self,
        origin: Point,
        destination: Point,
    ) -> Result<Option<String>> {
        let key = (
            format!("{:.4},{:.4}", origin.latitude, origin.longitude),
            format!("{:.4},{:.4}", destination.latitude, destination.longitude),
        );
        Ok(self.lock().polylines.get(&key).cloned())
    }

    async fn put_cached_polyline(
        &mut self,
        origin: Point,
        destination: Point,
        polyline: &str,
    ) -> Result<()> {
        let key = (
            format!("{:.4},{:.4}", origin.latitude, origin.longitude),
            format!("{:.4},{:.4}", destination.latitude, destination.longitude),
        );
        self.lock().polylines.insert(key, polyline.to_owned());
        Ok(())
    }
}

#[async_trait]
impl SessionRepo for MemHandle {
    async fn insert_session(&mut self, session: Session) -> Result<WithId<Session>> {
        let mut store = self.lock();
        let id = store.mint("session");
        store.sessions.insert(id.clone(), session.clone());
        Ok(WithId::new(Id::new(id), session))
    }

    async fn session_by_token_hash(
        &mut self,
        refresh_token_hash: &str,
    ) -> Result<Option<WithId<Session>>> {
        Ok(self.lock().sessions.iter().find_map(|(id, session)| {
            (session.refresh_token_hash == refresh_token_hash && session.active)
                .then(|| WithId::new(Id::new(id.clone()), session.clone()))
        }))
    }

    async fn rotate_session(
        &mut self,
        id: &Id<Session>,
        old_hash: &str,
        new_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut store = self.lock();
        match store.sessions.get_mut(&id.raw()) {
            Some(session)
                if session.refresh_token_hash == old_hash && session.active =>
            {
                session.refresh_token_hash = new_hash.to_owned();
                session.expires_at = expires_at;
                session.last_accessed = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn deactivate_session_by_hash(
        &mut self,
        refresh_token_hash: &str,
    ) -> Result<u64> {
        let mut store = self.lock();
        let mut affected = 0;
        for session in store.sessions.values_mut() {
            if session.refresh_token_hash == refresh_token_hash && session.active {
                session.active = false;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn purge_expired_sessions(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let mut store = self.lock();
        let before = store.sessions.len();
        store
            .sessions
            .retain(|_, session| session.active && session.expires_at >= now);
        Ok((before - store.sessions.len()) as u64)
    }
}

#[async_trait]
impl LedgerRepo for MemHandle {
    async fn put_idempotency_record(
        &mut self,
        key: &str,
        snapshot: &serde_json::Value,
    ) -> Result<()> {
        let mut store = self.lock();
        store
            .idempotency
            .entry(key.to_owned())
            .or_insert_with(|| IdempotencyRecord {
                response_snapshot: Some(snapshot.clone()),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn get_idempotency_record(
        &mut self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        Ok(self.lock().idempotency.get(key).cloned())
    }

    async fn record_webhook_event(
        &mut self,
        event_id: &str,
        event_type: &str,
    ) -> Result<u64> {
        let mut store = self.lock();
        if store.webhook_events.contains_key(event_id) {
            return Ok(0);
        }
        store.webhook_events.insert(
            event_id.to_owned(),
            WebhookEvent {
                event_type: event_type.to_owned(),
                processed_at: Utc::now(),
            },
        );
        Ok(1)
    }

    async fn webhook_event_seen(&mut self, event_id: &str) -> Result<bool> {
        Ok(self.lock().webhook_events.contains_key(event_id))
    }

    async fn purge_webhook_events(
        &mut self,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        let mut store = self.lock();
        let before = store.webhook_events.len();
        store
            .webhook_events
            .retain(|_, event| event.processed_at >= older_than);
        Ok((before - store.webhook_events.len()) as u64)
    }
}

#[async_trait]
impl NotificationRepo for MemHandle {
    async fn insert_notification(
        &mut self,
        notification: Notification,
    ) -> Result<WithId<Notification>> {
        let mut store = self.lock();
        let id = store.mint("notification");
        store.notifications.push(notification.clone());
        Ok(WithId::new(Id::new(id), notification))
    }
}

#[async_trait]
impl AuditRepo for MemHandle {
    async fn insert_audit_log(
        &mut self,
        entry: AuditLogEntry,
    ) -> Result<WithId<AuditLogEntry>> {
        let mut store = self.lock();
        let id = store.mint("audit");
        store.audits.push(entry.clone());
        Ok(WithId::new(Id::new(id), entry))
    }
}

// - collaborator fakes -

/// Reversible "encryption" so tests can assert on content without real
/// crypto.
pub struct FakeCrypto;

#[async_trait]
impl CryptoService for FakeCrypto {
    async fn encrypt_pii(
        &self,
        plain: &str,
        user_binding: &str,
    ) -> std::result::Result<Vec<u8>, CryptoError> {
        Ok(format!("{}:{}", user_binding, plain).into_bytes())
    }

    async fn decrypt_pii(
        &self,
        cipher: &[u8],
        user_binding: &str,
    ) -> std::result::Result<String, CryptoError> {
        let raw = String::from_utf8(cipher.to_vec())
            .map_err(|why| CryptoError(why.to_string()))?;
        raw.strip_prefix(&format!("{}:", user_binding))
            .map(str::to_owned)
            .ok_or_else(|| CryptoError("wrong binding".to_owned()))
    }

    fn hash_for_lookup(&self, plain: &str) -> String {
        format!("lookup:{}", plain)
    }

    fn hash_password(&self, plain: &str) -> std::result::Result<String, CryptoError> {
        Ok(format!("hashed:{}", plain))
    }

    fn verify_password(
        &self,
        plain: &str,
        hash: &str,
    ) -> std::result::Result<bool, CryptoError> {
        Ok(hash == format!("hashed:{}", plain))
    }
}

/// Scripted payment provider: mints sequential intent ids and counts calls
/// so tests can assert how often the remote API was hit. Clones share the
/// counters.
#[derive(Clone, Default)]
pub struct FakeProvider {
    pub created: Arc<AtomicU64>,
    pub fetched: Arc<AtomicU64>,
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn create_intent(
        &self,
        request: IntentRequest,
    ) -> carpool::Result<PaymentIntent> {
        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentIntent {
            id: format!("pi_{}", serial),
            client_secret: format!("pi_{}_secret", serial),
            amount: request.amount_minor,
            currency: request.currency,
            status: Some("requires_payment_method".to_owned()),
        })
    }

    async fn get_intent(&self, id: &str) -> carpool::Result<PaymentIntent> {
        self.fetched.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentIntent {
            id: id.to_owned(),
            client_secret: format!("{}_secret", id),
            amount: 4000,
            currency: "zar".to_owned(),
            status: Some("requires_payment_method".to_owned()),
        })
    }

    fn verify_webhook_signature(
        &self,
        body: &[u8],
        signature: &str,
        secret: &str,
    ) -> bool {
        carpool::stripe::verify_signature_header(
            body,
            signature,
            secret,
            Utc::now().timestamp(),
        )
    }
}

// - fixture helpers -

pub fn test_user(name: &str) -> User {
    User {
        email_lookup_hash: format!("lookup:{}@example.com", name),
        password_hash: Some("hashed:pw".to_owned()),
        oauth_identity: None,
        encrypted_profile: Vec::new(),
        role: Role::User,
        flags: UserFlags {
            active: true,
            email_verified: true,
            mfa_enabled: false,
            docs_verified: true,
        },
        rating: Some(4.8),
        organization_id: None,
        notification_prefs: NotificationPrefs::default(),
    }
}
