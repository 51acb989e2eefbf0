//! End-to-end scenarios over the in-memory store: matching, booking under
//! contention, payments with webhook replay, waitlist promotion.

mod common;

use std::sync::{atomic::Ordering, Arc};

use carpool::{
    auth::AuthService,
    booking::{BookingService, NewTrip},
    config::Environment,
    events::EventBus,
    kv::{KvStore, MemoryKv},
    ledger::IdempotencyLedger,
    matching::{MatchService, NewDriverTrip, NewRiderRequest},
    payments::PaymentService,
    stripe,
    Error,
};
use chrono::{DateTime, Duration, Utc};
use common::{test_user, FakeCrypto, FakeProvider, MemDatabase};
use model::{
    event::DomainEvent,
    matching::MatchConfig,
    participant::{ParticipantStatus, PaymentStatus},
    rider_request::RiderPreferences,
    trip::{Location, Trip, Vehicle},
    user::User,
    WithId,
};
use utility::id::Id;

struct World {
    db: MemDatabase,
    bus: EventBus,
    booking: BookingService<MemDatabase>,
    matching: MatchService<MemDatabase>,
    payments: PaymentService<MemDatabase, FakeProvider>,
    provider: FakeProvider,
}

fn world() -> World {
    let _ = env_logger::builder().is_test(true).try_init();
    let db = MemDatabase::new();
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let bus = EventBus::new();
    let ledger = IdempotencyLedger::new(db.clone(), kv.clone());
    let provider = FakeProvider::default();
    World {
        booking: BookingService::new(
            db.clone(),
            bus.clone(),
            ledger.clone(),
            Arc::new(FakeCrypto),
        ),
        matching: MatchService::new(db.clone(), kv),
        payments: PaymentService::new(
            db.clone(),
            Some(provider.clone()),
            bus.clone(),
            ledger,
            None,
            Environment::Development,
        ),
        db,
        bus,
        provider,
    }
}

fn departure() -> DateTime<Utc> {
    Utc::now() + Duration::hours(3)
}

async fn add_user(world: &World, name: &str) -> WithId<User> {
    use carpool::database::{Database as _, UserRepo as _};
    world
        .db
        .auto()
        .insert_user(test_user(name))
        .await
        .expect("insert user")
}

async fn scheduled_trip(world: &World, driver: &WithId<User>, seats: i32) -> WithId<Trip> {
    world
        .booking
        .create_trip(NewTrip {
            driver_id: driver.id.clone(),
            origin: Location::new(-26.20, 28.05),
            destination: Location::new(-26.11, 28.06),
            departure_time: departure(),
            arrival_time: None,
            total_seats: seats,
            price_per_seat: 40.0,
            currency: "zar".to_owned(),
            vehicle: Vehicle::default(),
        })
        .await
        .expect("create trip")
}

const PICKUP: (f64, f64) = (-26.195, 28.052);
const DROPOFF: (f64, f64) = (-26.112, 28.061);

async fn accepted_rider(
    world: &World,
    trip: &WithId<Trip>,
    rider: &WithId<User>,
    seats: i32,
) -> Id<model::participant::Participant> {
    let booked = world
        .booking
        .book_trip(
            &trip.id,
            &rider.id,
            Location::new(PICKUP.0, PICKUP.1),
            Location::new(DROPOFF.0, DROPOFF.1),
            seats,
            None,
        )
        .await
        .expect("book");
    world
        .booking
        .accept_booking(&trip.id, &booked.value.id, &trip.content.driver_id)
        .await
        .expect("accept");
    booked.value.id
}

fn succeeded_event(event_id: &str, intent_id: &str, booking_id: &str) -> Vec<u8> {
    format!(
        r#"{{"id":"{}","type":"payment_intent.succeeded","data":{{"object":{{"id":"{}","amount":4000,"metadata":{{"bookingId":"{}"}}}}}}}}"#,
        event_id, intent_id, booking_id
    )
    .into_bytes()
}

#[tokio::test]
async fn s1_basic_match_and_book() {
    let world = world();
    let driver = add_user(&world, "driver").await;
    let rider = add_user(&world, "rider").await;

    let offer = world
        .matching
        .create_driver_trip(NewDriverTrip {
            driver_id: driver.id.clone(),
            origin: Location::new(-26.20, 28.05),
            destination: Location::new(-26.11, 28.06),
            departure_time: departure(),
            arrival_time: None,
            total_seats: 4,
            price_per_seat: 40.0,
            currency: "zar".to_owned(),
            vehicle: Vehicle::default(),
            organization_id: None,
        })
        .await
        .expect("offer");

    let request = world
        .matching
        .create_rider_request(NewRiderRequest {
            rider_id: rider.id.clone(),
            pickup: Location::new(PICKUP.0, PICKUP.1),
            dropoff: Location::new(DROPOFF.0, DROPOFF.1),
            earliest_departure: departure() - Duration::minutes(15),
            latest_departure: departure() + Duration::minutes(15),
            seats_needed: 1,
            preferences: RiderPreferences::default(),
            organization_id: None,
        })
        .await
        .expect("request");

    let outcome = world.matching.find_matches(&request.id).await.expect("match");
    assert!(!outcome.matches.is_empty());
    let best = &outcome.matches[0];
    assert_eq!(best.content.driver_trip_id, offer.id);
    assert!(best.content.detour_minutes <= 10.0);
    assert!(best.content.pickup_distance_km <= 0.5);

    // booking side: trip with 4 seats, book then accept
    let trip = scheduled_trip(&world, &driver, 4).await;
    let booked = world
        .booking
        .book_trip(
            &trip.id,
            &rider.id,
            Location::new(PICKUP.0, PICKUP.1),
            Location::new(DROPOFF.0, DROPOFF.1),
            1,
            None,
        )
        .await
        .expect("book");
    assert!(!booked.replay);
    assert_eq!(booked.value.content.status, ParticipantStatus::Requested);

    let accepted = world
        .booking
        .accept_booking(&trip.id, &booked.value.id, &driver.id)
        .await
        .expect("accept");
    assert_eq!(accepted.content.status, ParticipantStatus::Accepted);

    use carpool::database::{Database as _, TripRepo as _};
    let trip_now = world.db.auto().get_trip(&trip.id).await.expect("trip");
    assert_eq!(trip_now.content.available_seats, 3);
    world.db.assert_seat_conservation(&trip.id);
}

#[tokio::test]
async fn s2_seat_race_exactly_one_wins() {
    let world = world();
    let driver = add_user(&world, "driver").await;
    let rider_a = add_user(&world, "rider-a").await;
    let rider_b = add_user(&world, "rider-b").await;
    let trip = scheduled_trip(&world, &driver, 1).await;

    let booked_a = world
        .booking
        .book_trip(
            &trip.id,
            &rider_a.id,
            Location::new(PICKUP.0, PICKUP.1),
            Location::new(DROPOFF.0, DROPOFF.1),
            1,
            None,
        )
        .await
        .expect("book a");
    let booked_b = world
        .booking
        .book_trip(
            &trip.id,
            &rider_b.id,
            Location::new(PICKUP.0, PICKUP.1),
            Location::new(DROPOFF.0, DROPOFF.1),
            1,
            None,
        )
        .await
        .expect("book b");

    let first = world
        .booking
        .accept_booking(&trip.id, &booked_a.value.id, &driver.id)
        .await;
    let second = world
        .booking
        .accept_booking(&trip.id, &booked_b.value.id, &driver.id)
        .await;

    assert!(first.is_ok());
    match second {
        Err(Error::Conflict(_)) => {}
        other => panic!("expected CONFLICT, got {:?}", other.map(|p| p.content.status)),
    }

    use carpool::database::{Database as _, TripRepo as _};
    let trip_now = world.db.auto().get_trip(&trip.id).await.expect("trip");
    assert_eq!(trip_now.content.available_seats, 0);
    world.db.assert_seat_conservation(&trip.id);

    // accepting the same booking again conflicts and does not double-reserve
    let again = world
        .booking
        .accept_booking(&trip.id, &booked_a.value.id, &driver.id)
        .await;
    assert!(matches!(again, Err(Error::Conflict(_))));
    world.db.assert_seat_conservation(&trip.id);
}

#[tokio::test]
async fn s3_webhook_replay_applies_once() {
    let world = world();
    let driver = add_user(&world, "driver").await;
    let rider = add_user(&world, "rider").await;
    let trip = scheduled_trip(&world, &driver, 4).await;
    let participant_id = accepted_rider(&world, &trip, &rider, 1).await;

    let intent = world
        .payments
        .create_intent(&trip.id, &rider.id, 4000, None)
        .await
        .expect("intent");

    let mut events = world.bus.subscribe(&rider.id);
    let body = succeeded_event("evt_1", &intent.value.payment_intent_id, &participant_id.raw());

    let first = world.payments.handle_webhook(&body, None).await.expect("first");
    assert!(!first.replay);
    let second = world.payments.handle_webhook(&body, None).await.expect("second");
    assert!(second.replay);

    use carpool::database::{Database as _, ParticipantRepo as _};
    let participant = world
        .db
        .auto()
        .get_participant(&participant_id)
        .await
        .expect("participant");
    assert_eq!(participant.content.payment_status, PaymentStatus::Paid);
    assert!(participant.content.payment_completed_at.is_some());

    let mut succeeded = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DomainEvent::PaymentSucceeded { .. }) {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 1, "payment:succeeded must be emitted exactly once");
}

#[tokio::test]
async fn s4_idempotent_intent_creation() {
    let world = world();
    let driver = add_user(&world, "driver").await;
    let rider = add_user(&world, "rider").await;
    let trip = scheduled_trip(&world, &driver, 4).await;
    accepted_rider(&world, &trip, &rider, 1).await;

    let first = world
        .payments
        .create_intent(&trip.id, &rider.id, 4000, Some("idem-key-1"))
        .await
        .expect("first");
    assert!(!first.replay);

    let second = world
        .payments
        .create_intent(&trip.id, &rider.id, 4000, Some("idem-key-1"))
        .await
        .expect("second");
    assert!(second.replay);
    assert_eq!(
        first.value.payment_intent_id,
        second.value.payment_intent_id
    );
    assert_eq!(first.value.client_secret, second.value.client_secret);
    assert_eq!(world.provider.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn amount_mismatch_is_rejected() {
    let world = world();
    let driver = add_user(&world, "driver").await;
    let rider = add_user(&world, "rider").await;
    let trip = scheduled_trip(&world, &driver, 4).await;
    accepted_rider(&world, &trip, &rider, 2).await;

    // 2 seats at 40 ZAR are 8000 minor units
    let wrong = world
        .payments
        .create_intent(&trip.id, &rider.id, 4000, None)
        .await;
    assert!(matches!(wrong, Err(Error::Validation(_))));
    let right = world
        .payments
        .create_intent(&trip.id, &rider.id, 8000, None)
        .await;
    assert!(right.is_ok());
}

#[tokio::test]
async fn s5_pool_optimisation() {
    let world = world();
    world
        .matching
        .set_config(
            None,
            &MatchConfig {
                enable_multi_rider: true,
                ..MatchConfig::default()
            },
        )
        .await
        .expect("config");

    let driver = add_user(&world, "driver").await;
    let offer = world
        .matching
        .create_driver_trip(NewDriverTrip {
            driver_id: driver.id.clone(),
            origin: Location::new(-26.20, 28.05),
            destination: Location::new(-26.11, 28.06),
            departure_time: departure(),
            arrival_time: None,
            total_seats: 4,
            price_per_seat: 40.0,
            currency: "zar".to_owned(),
            vehicle: Vehicle::default(),
            organization_id: None,
        })
        .await
        .expect("offer");

    let corridors = [
        ((-26.195, 28.052), (-26.112, 28.061)),
        ((-26.185, 28.054), (-26.120, 28.060)),
        ((-26.175, 28.056), (-26.125, 28.058)),
    ];
    let mut request_ids = Vec::new();
    for (index, (pickup, dropoff)) in corridors.iter().enumerate() {
        let rider = add_user(&world, &format!("rider-{}", index)).await;
        let request = world
            .matching
            .create_rider_request(NewRiderRequest {
                rider_id: rider.id.clone(),
                pickup: Location::new(pickup.0, pickup.1),
                dropoff: Location::new(dropoff.0, dropoff.1),
                earliest_departure: departure() - Duration::minutes(15),
                latest_departure: departure() + Duration::minutes(15),
                seats_needed: 1,
                preferences: RiderPreferences::default(),
                organization_id: None,
            })
            .await
            .expect("request");
        request_ids.push(request.id);
    }

    // seed matches for the first two riders, then pool on the third
    world
        .matching
        .find_matches(&request_ids[0])
        .await
        .expect("match 0");
    world
        .matching
        .find_matches(&request_ids[1])
        .await
        .expect("match 1");
    let outcome = world
        .matching
        .find_pool(&request_ids[2])
        .await
        .expect("pool");

    let pool = outcome.pool.expect("pool assignment");
    assert_eq!(pool.content.driver_trip_id, offer.id);
    assert_eq!(pool.content.seats_used, 3);
    assert!(pool.content.total_detour_minutes <= MatchConfig::default().max_pool_detour_min);
    assert_eq!(pool.content.ordered_stops.len(), 6);
    for member in &pool.content.members {
        assert!(member.pickup_order < member.dropoff_order);
    }
}

#[tokio::test]
async fn s6_cancel_with_waitlist_promotion() {
    let world = world();
    let driver = add_user(&world, "driver").await;
    let rider_a = add_user(&world, "rider-a").await;
    let rider_b = add_user(&world, "rider-b").await;
    let rider_c = add_user(&world, "rider-c").await;
    let trip = scheduled_trip(&world, &driver, 2).await;

    let participant_a = accepted_rider(&world, &trip, &rider_a, 1).await;
    accepted_rider(&world, &trip, &rider_b, 1).await;

    world
        .booking
        .join_waitlist(
            &trip.id,
            &rider_c.id,
            1,
            Some(Location::new(PICKUP.0, PICKUP.1)),
            Some(Location::new(DROPOFF.0, DROPOFF.1)),
        )
        .await
        .expect("waitlist");

    world
        .booking
        .cancel_booking(&trip.id, &participant_a, &rider_a.id)
        .await
        .expect("cancel");

    use carpool::database::{
        Database as _, ParticipantRepo as _, TripRepo as _, WaitlistRepo as _,
    };
    let cancelled = world
        .db
        .auto()
        .get_participant(&participant_a)
        .await
        .expect("participant");
    assert_eq!(cancelled.content.status, ParticipantStatus::Cancelled);

    // waitlist row flipped; no waiting entry remains
    let waiting = world
        .db
        .auto()
        .oldest_waiting(&trip.id, 2)
        .await
        .expect("waitlist query");
    assert!(waiting.is_none());
    world.db.with_store(|store| {
        // promoted rider holds a fresh requested participant
        assert!(store.notifications.iter().any(|notification| {
            notification.kind == model::notification::NotificationKind::WaitlistPromoted
        }));
    });
    let promoted = world
        .db
        .auto()
        .participant_for_user(&trip.id, &rider_c.id)
        .await
        .expect("lookup")
        .expect("promoted participant");
    assert_eq!(promoted.content.status, ParticipantStatus::Requested);

    let trip_now = world.db.auto().get_trip(&trip.id).await.expect("trip");
    assert_eq!(trip_now.content.available_seats, 1);
    world.db.assert_seat_conservation(&trip.id);
}

#[tokio::test]
async fn stale_webhook_never_moves_payment_backwards() {
    let world = world();
    let driver = add_user(&world, "driver").await;
    let rider = add_user(&world, "rider").await;
    let trip = scheduled_trip(&world, &driver, 4).await;
    let participant_id = accepted_rider(&world, &trip, &rider, 1).await;

    let intent = world
        .payments
        .create_intent(&trip.id, &rider.id, 4000, None)
        .await
        .expect("intent");
    let intent_id = intent.value.payment_intent_id;

    let paid = succeeded_event("evt_paid", &intent_id, &participant_id.raw());
    world.payments.handle_webhook(&paid, None).await.expect("paid");

    // a late failure event for the same intent must not regress `paid`
    let failed = format!(
        r#"{{"id":"evt_failed","type":"payment_intent.payment_failed","data":{{"object":{{"id":"{}","metadata":{{"bookingId":"{}"}}}}}}}}"#,
        intent_id,
        participant_id.raw()
    );
    world
        .payments
        .handle_webhook(failed.as_bytes(), None)
        .await
        .expect("failed event");

    use carpool::database::{Database as _, ParticipantRepo as _};
    let participant = world
        .db
        .auto()
        .get_participant(&participant_id)
        .await
        .expect("participant");
    assert_eq!(participant.content.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn webhook_signature_is_enforced_when_configured() {
    let db = MemDatabase::new();
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let ledger = IdempotencyLedger::new(db.clone(), kv);
    let payments = PaymentService::new(
        db,
        Some(FakeProvider::default()),
        EventBus::new(),
        ledger,
        Some("whsec_test".to_owned()),
        Environment::Production,
    );

    let body = br#"{"id":"evt_s","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","metadata":{"bookingId":"p-1"}}}}"#;
    let missing = payments.handle_webhook(body, None).await;
    assert!(matches!(missing, Err(Error::Authentication(_))));

    let forged = payments.handle_webhook(body, Some("t=1,v1=dead")).await;
    assert!(matches!(forged, Err(Error::Authentication(_))));

    let header = stripe::sign_payload(body, "whsec_test", Utc::now().timestamp());
    // valid signature reaches the handler (unknown booking is dropped, not an error)
    let accepted = payments.handle_webhook(body, Some(&header)).await;
    assert!(accepted.is_ok());
}

#[tokio::test]
async fn refresh_token_rotation_rejects_replays() {
    let world = world();
    let user = add_user(&world, "driver").await;
    let auth = AuthService::new(world.db.clone(), "secret".to_owned());

    let pair = auth.issue(&user).await.expect("issue");
    let claims = auth.verify_access(&pair.access_token).expect("claims");
    assert_eq!(claims.sub, user.id.raw());

    let rotated = auth.refresh(&pair.refresh_token).await.expect("rotate");
    assert_ne!(rotated.refresh_token, pair.refresh_token);

    // the old token was rotated away; replaying it is an auth failure
    let replay = auth.refresh(&pair.refresh_token).await;
    assert!(matches!(replay, Err(Error::Authentication(_))));

    // the fresh token keeps working
    assert!(auth.refresh(&rotated.refresh_token).await.is_ok());
}

#[tokio::test]
async fn booked_idempotency_key_replays_the_same_participant() {
    let world = world();
    let driver = add_user(&world, "driver").await;
    let rider = add_user(&world, "rider").await;
    let trip = scheduled_trip(&world, &driver, 4).await;

    let first = world
        .booking
        .book_trip(
            &trip.id,
            &rider.id,
            Location::new(PICKUP.0, PICKUP.1),
            Location::new(DROPOFF.0, DROPOFF.1),
            1,
            Some("book-key"),
        )
        .await
        .expect("first");
    let second = world
        .booking
        .book_trip(
            &trip.id,
            &rider.id,
            Location::new(PICKUP.0, PICKUP.1),
            Location::new(DROPOFF.0, DROPOFF.1),
            1,
            Some("book-key"),
        )
        .await
        .expect("second");
    assert!(second.replay);
    assert_eq!(first.value.id, second.value.id);
}

#[tokio::test]
async fn completed_trip_can_be_rated_once() {
    let world = world();
    let driver = add_user(&world, "driver").await;
    let rider = add_user(&world, "rider").await;
    let trip = scheduled_trip(&world, &driver, 4).await;
    let participant_id = accepted_rider(&world, &trip, &rider, 1).await;

    world
        .booking
        .complete_trip(&trip.id, &driver.id)
        .await
        .expect("complete");
    world
        .booking
        .rate_trip(&trip.id, &rider.id, 5, Some("great ride"))
        .await
        .expect("rate");
    // repeat is accepted and ignored
    world
        .booking
        .rate_trip(&trip.id, &rider.id, 1, None)
        .await
        .expect("repeat rate");

    use carpool::database::{Database as _, ParticipantRepo as _};
    let participant = world
        .db
        .auto()
        .get_participant(&participant_id)
        .await
        .expect("participant");
    assert_eq!(participant.content.rating, Some(5));
    assert!(participant.content.encrypted_review.is_some());
}
