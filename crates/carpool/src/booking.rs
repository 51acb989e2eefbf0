use std::sync::Arc;

use chrono::Utc;
use log::warn;
use model::{
    audit::{
        AuditLogEntry, ACTION_BOOKING_ACCEPTED, ACTION_BOOKING_REJECTED,
        ACTION_TRIP_CANCELLED,
    },
    event::DomainEvent,
    notification::{Notification, NotificationKind},
    participant::{
        Participant, ParticipantRole, ParticipantStatus, PaymentStatus, PayoutStatus,
    },
    trip::{Location, Trip, TripStatus, Vehicle},
    user::User,
    waitlist::{WaitlistEntry, WaitlistStatus},
    WithId,
};
use utility::id::Id;

use crate::{
    crypto::CryptoService,
    database::{
        AuditRepo as _, Database, NotificationRepo as _, ParticipantRepo as _,
        TripRepo as _, UserRepo as _, WaitlistRepo as _,
    },
    error::{Error, Result},
    events::EventBus,
    ledger::IdempotencyLedger,
    Replayable,
};

const IDEMPOTENCY_SCOPE: &str = "book";

#[derive(Debug, Clone)]
pub struct NewTrip {
    pub driver_id: Id<User>,
    pub origin: Location,
    pub destination: Location,
    pub departure_time: chrono::DateTime<Utc>,
    pub arrival_time: Option<chrono::DateTime<Utc>>,
    pub total_seats: i32,
    pub price_per_seat: f64,
    pub currency: String,
    pub vehicle: Vehicle,
}

/// The booking state machine over `(trip, participant)` rows. Competing
/// commands for the same participant serialise through single conditional
/// UPDATEs; whichever command's predicate still matches wins and the loser
/// observes 0 rows affected.
#[derive(Clone)]
pub struct BookingService<D: Database> {
    database: D,
    bus: EventBus,
    ledger: IdempotencyLedger<D>,
    crypto: Arc<dyn CryptoService>,
}

impl<D: Database> BookingService<D> {
    pub fn new(
        database: D,
        bus: EventBus,
        ledger: IdempotencyLedger<D>,
        crypto: Arc<dyn CryptoService>,
    ) -> Self {
        Self {
            database,
            bus,
            ledger,
            crypto,
        }
    }

    pub async fn create_trip(&self, new: NewTrip) -> Result<WithId<Trip>> {
        if new.total_seats < 1 {
            return Err(Error::validation("totalSeats must be at least 1"));
        }
        if new.price_per_seat < 0.0 {
            return Err(Error::validation("pricePerSeat must not be negative"));
        }

        let trip = self
            .database
            .auto()
            .insert_trip(Trip {
                driver_id: new.driver_id.clone(),
                origin: new.origin,
                destination: new.destination,
                departure_time: new.departure_time,
                arrival_time: new.arrival_time,
                total_seats: new.total_seats,
                available_seats: new.total_seats,
                price_per_seat: new.price_per_seat,
                currency: new.currency,
                vehicle: new.vehicle,
                status: TripStatus::Scheduled,
            })
            .await?;

        // the driver occupies the single accepted driver slot, holding no
        // rider seats
        self.database
            .auto()
            .insert_participant(Participant {
                trip_id: trip.id.clone(),
                user_id: new.driver_id.clone(),
                role: ParticipantRole::Driver,
                status: ParticipantStatus::Accepted,
                seats_held: 0,
                pickup: None,
                dropoff: None,
                payment_intent_id: None,
                payment_status: PaymentStatus::Unpaid,
                payment_completed_at: None,
                payout_status: PayoutStatus::NotDue,
                rating: None,
                encrypted_review: None,
                requested_at: Utc::now(),
            })
            .await?;

        self.bus.publish(&DomainEvent::TripCreated {
            trip_id: trip.id.clone(),
            driver_id: new.driver_id,
        });
        Ok(trip)
    }

    /// Open trips near a pickup point with enough free seats, soonest
    /// departure first.
    pub async fn available_trips(
        &self,
        pickup: Location,
        radius_km: f64,
        departure_after: chrono::DateTime<Utc>,
        seats: i32,
    ) -> Result<Vec<WithId<Trip>>> {
        if !(1..=4).contains(&seats) {
            return Err(Error::validation("seats must be between 1 and 4"));
        }
        Ok(self
            .database
            .auto()
            .find_available_trips(pickup.point(), radius_km, departure_after, seats)
            .await?)
    }

    /// `bookTrip`: inserts a `requested` participant. Seats are only held
    /// once the driver accepts.
    pub async fn book_trip(
        &self,
        trip_id: &Id<Trip>,
        user_id: &Id<User>,
        pickup: Location,
        dropoff: Location,
        seats: i32,
        idempotency_key: Option<&str>,
    ) -> Result<Replayable<WithId<Participant>>> {
        if !(1..=4).contains(&seats) {
            return Err(Error::validation("seats must be between 1 and 4"));
        }

        if let Some(key) = idempotency_key {
            if let Some(stored) = self
                .ledger
                .stored_response(IDEMPOTENCY_SCOPE, &user_id.raw(), key)
                .await
            {
                if let Some(participant_id) = stored
                    .get("id")
                    .and_then(|id| id.as_str())
                {
                    let participant = self
                        .database
                        .auto()
                        .get_participant(&Id::new(participant_id.to_owned()))
                        .await?;
                    return Ok(Replayable::replayed(participant));
                }
            }
        }

        let trip = self.database.auto().get_trip(trip_id).await?;
        if trip.content.status != TripStatus::Scheduled {
            return Err(Error::conflict("trip is not open for booking"));
        }
        if trip.content.available_seats < seats {
            return Err(Error::conflict("no seats available"));
        }
        if let Some(existing) = self
            .database
            .auto()
            .participant_for_user(trip_id, user_id)
            .await?
        {
            return Err(Error::Conflict(format!(
                "already booked with status {}",
                existing.content.status.as_str()
            )));
        }

        let participant = self
            .database
            .auto()
            .insert_participant(Participant {
                trip_id: trip_id.clone(),
                user_id: user_id.clone(),
                role: ParticipantRole::Rider,
                status: ParticipantStatus::Requested,
                seats_held: seats,
                pickup: Some(pickup),
                dropoff: Some(dropoff),
                payment_intent_id: None,
                payment_status: PaymentStatus::Unpaid,
                payment_completed_at: None,
                payout_status: PayoutStatus::NotDue,
                rating: None,
                encrypted_review: None,
                requested_at: Utc::now(),
            })
            .await?;

        self.bus.publish(&DomainEvent::BookingRequested {
            trip_id: trip_id.clone(),
            participant_id: participant.id.clone(),
            rider_id: user_id.clone(),
            driver_id: trip.content.driver_id.clone(),
        });
        self.notify(
            &trip.content.driver_id,
            NotificationKind::BookingRequested,
            "New booking request",
            format!("A rider requested {} seat(s) on your trip.", seats),
        )
        .await;

        if let Some(key) = idempotency_key {
            if let Ok(snapshot) = serde_json::to_value(&participant) {
                self.ledger
                    .store_response(IDEMPOTENCY_SCOPE, &user_id.raw(), key, &snapshot)
                    .await;
            }
        }

        Ok(Replayable::fresh(participant))
    }

    /// `acceptBooking`: requested → accepted with a seat reservation. The
    /// status transition happens first and is compensated back if the seat
    /// reservation loses the race.
    pub async fn accept_booking(
        &self,
        trip_id: &Id<Trip>,
        participant_id: &Id<Participant>,
        actor_id: &Id<User>,
    ) -> Result<WithId<Participant>> {
        let trip = self.database.auto().get_trip(trip_id).await?;
        if trip.content.driver_id != *actor_id {
            return Err(Error::Authorization(
                "only the driver may accept bookings".to_owned(),
            ));
        }
        if trip.content.status.is_terminal() {
            return Err(Error::conflict("trip is no longer active"));
        }
        let participant = self.database.auto().get_participant(participant_id).await?;
        if participant.content.trip_id != *trip_id {
            return Err(Error::NotFound("booking"));
        }

        let transitioned = self
            .database
            .auto()
            .transition_participant(
                participant_id,
                &[ParticipantStatus::Requested],
                ParticipantStatus::Accepted,
            )
            .await?;
        if transitioned == 0 {
            return Err(Error::conflict("booking is no longer pending"));
        }

        let reserved = self
            .database
            .auto()
            .reserve_seats(trip_id, participant.content.seats_held)
            .await?;
        if reserved == 0 {
            // lost the seat race; undo the acceptance
            self.database
                .auto()
                .transition_participant(
                    participant_id,
                    &[ParticipantStatus::Accepted],
                    ParticipantStatus::Requested,
                )
                .await?;
            return Err(Error::conflict("no seats available"));
        }

        self.bus.publish(&DomainEvent::BookingAccepted {
            trip_id: trip_id.clone(),
            participant_id: participant_id.clone(),
            rider_id: participant.content.user_id.clone(),
        });
        self.notify(
            &participant.content.user_id,
            NotificationKind::BookingAccepted,
            "Booking accepted",
            "Your booking was accepted by the driver.".to_owned(),
        )
        .await;
        self.audit(
            Some(actor_id),
            ACTION_BOOKING_ACCEPTED,
            "participant",
            &participant_id.raw(),
        )
        .await;

        Ok(self.database.auto().get_participant(participant_id).await?)
    }

    /// `rejectBooking`: requested → rejected, no seat movement.
    pub async fn reject_booking(
        &self,
        trip_id: &Id<Trip>,
        participant_id: &Id<Participant>,
        actor_id: &Id<User>,
        reason: Option<&str>,
    ) -> Result<()> {
        let trip = self.database.auto().get_trip(trip_id).await?;
        if trip.content.driver_id != *actor_id {
            return Err(Error::Authorization(
                "only the driver may reject bookings".to_owned(),
            ));
        }
        let participant = self.database.auto().get_participant(participant_id).await?;
        if participant.content.trip_id != *trip_id {
            return Err(Error::NotFound("booking"));
        }

        let transitioned = self
            .database
            .auto()
            .transition_participant(
                participant_id,
                &[ParticipantStatus::Requested],
                ParticipantStatus::Rejected,
            )
            .await?;
        if transitioned == 0 {
            return Err(Error::conflict("booking is no longer pending"));
        }

        self.bus.publish(&DomainEvent::BookingRejected {
            trip_id: trip_id.clone(),
            participant_id: participant_id.clone(),
            rider_id: participant.content.user_id.clone(),
        });
        self.notify(
            &participant.content.user_id,
            NotificationKind::BookingRejected,
            "Booking declined",
            reason.unwrap_or("The driver declined your booking.").to_owned(),
        )
        .await;
        self.audit(
            Some(actor_id),
            ACTION_BOOKING_REJECTED,
            "participant",
            &participant_id.raw(),
        )
        .await;
        Ok(())
    }

    /// Rider-initiated cancellation. Cancelling an accepted booking releases
    /// the held seats and promotes the waitlist.
    pub async fn cancel_booking(
        &self,
        trip_id: &Id<Trip>,
        participant_id: &Id<Participant>,
        actor_id: &Id<User>,
    ) -> Result<()> {
        let participant = self.database.auto().get_participant(participant_id).await?;
        if participant.content.trip_id != *trip_id {
            return Err(Error::NotFound("booking"));
        }
        if participant.content.user_id != *actor_id {
            return Err(Error::Authorization(
                "only the rider may cancel their booking".to_owned(),
            ));
        }

        if !matches!(
            participant.content.status,
            ParticipantStatus::Requested | ParticipantStatus::Accepted
        ) {
            return Err(Error::conflict("booking is no longer active"));
        }

        let was_accepted = participant.content.status == ParticipantStatus::Accepted;
        let transitioned = self
            .database
            .auto()
            .transition_participant(
                participant_id,
                &[participant.content.status],
                ParticipantStatus::Cancelled,
            )
            .await?;
        if transitioned == 0 {
            return Err(Error::conflict("booking changed state, retry"));
        }

        if was_accepted {
            self.database
                .auto()
                .release_seats(trip_id, participant.content.seats_held)
                .await?;
            self.promote_waitlist(trip_id).await?;
        }
        Ok(())
    }

    /// `cancelTrip`: terminal for the trip; every open participant is
    /// cancelled and held seats return to the pool so seat conservation
    /// holds on the final state.
    pub async fn cancel_trip(&self, trip_id: &Id<Trip>, actor_id: &Id<User>) -> Result<()> {
        let trip = self.database.auto().get_trip(trip_id).await?;
        if trip.content.driver_id != *actor_id {
            return Err(Error::Authorization(
                "only the driver may cancel the trip".to_owned(),
            ));
        }

        let cancelled = self
            .database
            .auto()
            .transition_trip(
                trip_id,
                &[TripStatus::Scheduled, TripStatus::Active],
                TripStatus::Cancelled,
            )
            .await?;
        if cancelled == 0 {
            return Err(Error::conflict("trip is already finished or cancelled"));
        }

        let participants = self
            .database
            .auto()
            .participants_for_trip(trip_id)
            .await?;
        for participant in participants {
            if participant.content.role == ParticipantRole::Driver {
                continue;
            }
            let from = participant.content.status;
            if !matches!(
                from,
                ParticipantStatus::Requested | ParticipantStatus::Accepted
            ) {
                continue;
            }
            let moved = self
                .database
                .auto()
                .transition_participant(
                    &participant.id,
                    &[from],
                    ParticipantStatus::Cancelled,
                )
                .await?;
            if moved > 0 && from == ParticipantStatus::Accepted {
                self.database
                    .auto()
                    .release_seats(trip_id, participant.content.seats_held)
                    .await?;
            }
            self.bus.emit_to(
                &participant.content.user_id,
                DomainEvent::TripCancelled {
                    trip_id: trip_id.clone(),
                    driver_id: trip.content.driver_id.clone(),
                },
            );
            self.notify(
                &participant.content.user_id,
                NotificationKind::TripCancelled,
                "Trip cancelled",
                "The driver cancelled the trip.".to_owned(),
            )
            .await;
        }

        self.bus.publish(&DomainEvent::TripCancelled {
            trip_id: trip_id.clone(),
            driver_id: trip.content.driver_id.clone(),
        });
        self.audit(Some(actor_id), ACTION_TRIP_CANCELLED, "trip", &trip_id.raw())
            .await;
        Ok(())
    }

    /// Completes the trip and every accepted participant, making them
    /// rateable.
    pub async fn complete_trip(&self, trip_id: &Id<Trip>, actor_id: &Id<User>) -> Result<()> {
        let trip = self.database.auto().get_trip(trip_id).await?;
        if trip.content.driver_id != *actor_id {
            return Err(Error::Authorization(
                "only the driver may complete the trip".to_owned(),
            ));
        }
        let completed = self
            .database
            .auto()
            .transition_trip(
                trip_id,
                &[TripStatus::Scheduled, TripStatus::Active],
                TripStatus::Completed,
            )
            .await?;
        if completed == 0 {
            return Err(Error::conflict("trip is already finished or cancelled"));
        }

        let participants = self
            .database
            .auto()
            .participants_for_trip(trip_id)
            .await?;
        for participant in participants {
            if participant.content.status == ParticipantStatus::Accepted {
                self.database
                    .auto()
                    .transition_participant(
                        &participant.id,
                        &[ParticipantStatus::Accepted],
                        ParticipantStatus::Completed,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// `rateTrip`: one rating per completed participation; repeats are
    /// accepted and ignored. The review text is stored encrypted, bound to
    /// the rated trip's driver.
    pub async fn rate_trip(
        &self,
        trip_id: &Id<Trip>,
        user_id: &Id<User>,
        rating: i32,
        comment: Option<&str>,
    ) -> Result<()> {
        if !(1..=5).contains(&rating) {
            return Err(Error::validation("rating must be between 1 and 5"));
        }
        let participant = self
            .database
            .auto()
            .participant_for_user(trip_id, user_id)
            .await?
            .ok_or(Error::NotFound("booking"))?;
        if participant.content.status != ParticipantStatus::Completed {
            return Err(Error::validation("trip is not completed for this user"));
        }

        let encrypted_review = match comment {
            Some(comment) => Some(
                self.crypto
                    .encrypt_pii(comment, &user_id.raw())
                    .await
                    .map_err(Error::internal)?,
            ),
            None => None,
        };

        let written = self
            .database
            .auto()
            .record_rating(&participant.id, rating, encrypted_review)
            .await?;
        if written == 0 {
            // already rated; rating writes are once-only and idempotent
            return Ok(());
        }

        let trip = self.database.auto().get_trip(trip_id).await?;
        if let Err(why) = self
            .database
            .auto()
            .recompute_driver_rating(&trip.content.driver_id)
            .await
        {
            warn!("booking: driver rating refresh failed: {:?}", why);
        }
        Ok(())
    }

    /// Queues a rider for a full trip.
    pub async fn join_waitlist(
        &self,
        trip_id: &Id<Trip>,
        user_id: &Id<User>,
        seats: i32,
        pickup: Option<Location>,
        dropoff: Option<Location>,
    ) -> Result<WithId<WaitlistEntry>> {
        if !(1..=4).contains(&seats) {
            return Err(Error::validation("seats must be between 1 and 4"));
        }
        let trip = self.database.auto().get_trip(trip_id).await?;
        if trip.content.status != TripStatus::Scheduled {
            return Err(Error::conflict("trip is not open for booking"));
        }
        Ok(self
            .database
            .auto()
            .join_waitlist(WaitlistEntry {
                trip_id: trip_id.clone(),
                user_id: user_id.clone(),
                seats_needed: seats,
                pickup,
                dropoff,
                status: WaitlistStatus::Waiting,
                joined_at: Utc::now(),
            })
            .await?)
    }

    /// Runs after any transition that releases seats: the oldest fitting
    /// `waiting` entry flips to `promoted` and materialises a fresh
    /// `requested` participant for the driver to act on.
    pub async fn promote_waitlist(&self, trip_id: &Id<Trip>) -> Result<()> {
        let trip = self.database.auto().get_trip(trip_id).await?;
        if trip.content.available_seats < 1
            || trip.content.status != TripStatus::Scheduled
        {
            return Ok(());
        }
        let Some(entry) = self
            .database
            .auto()
            .oldest_waiting(trip_id, trip.content.available_seats)
            .await?
        else {
            return Ok(());
        };

        let promoted = self
            .database
            .auto()
            .promote_waitlist_entry(&entry.id)
            .await?;
        if promoted == 0 {
            // someone else promoted concurrently
            return Ok(());
        }

        let inserted = self
            .database
            .auto()
            .insert_participant(Participant {
                trip_id: trip_id.clone(),
                user_id: entry.content.user_id.clone(),
                role: ParticipantRole::Rider,
                status: ParticipantStatus::Requested,
                seats_held: entry.content.seats_needed,
                pickup: entry.content.pickup.clone(),
                dropoff: entry.content.dropoff.clone(),
                payment_intent_id: None,
                payment_status: PaymentStatus::Unpaid,
                payment_completed_at: None,
                payout_status: PayoutStatus::NotDue,
                rating: None,
                encrypted_review: None,
                requested_at: Utc::now(),
            })
            .await;
        let participant = match inserted {
            Ok(participant) => participant,
            Err(why) => {
                // e.g. the user already holds a participant row on this trip
                warn!("booking: waitlist promotion insert failed: {:?}", why);
                return Ok(());
            }
        };

        self.bus.publish(&DomainEvent::BookingRequested {
            trip_id: trip_id.clone(),
            participant_id: participant.id.clone(),
            rider_id: entry.content.user_id.clone(),
            driver_id: trip.content.driver_id.clone(),
        });
        self.notify(
            &entry.content.user_id,
            NotificationKind::WaitlistPromoted,
            "A seat opened up",
            "You were moved off the waitlist; waiting for driver approval."
                .to_owned(),
        )
        .await;
        Ok(())
    }

    /// Best-effort notification write honouring the user's preferences.
    async fn notify(
        &self,
        user_id: &Id<User>,
        kind: NotificationKind,
        title: &str,
        body: String,
    ) {
        let allowed = match self.database.auto().get_user(user_id).await {
            Ok(user) => match kind {
                NotificationKind::PaymentSucceeded | NotificationKind::PaymentFailed => {
                    user.content.notification_prefs.payment
                }
                _ => user.content.notification_prefs.booking,
            },
            Err(why) => {
                warn!("booking: notification pref lookup failed: {:?}", why);
                return;
            }
        };
        if !allowed {
            return;
        }
        let result = self
            .database
            .auto()
            .insert_notification(Notification {
                user_id: user_id.clone(),
                kind,
                title: title.to_owned(),
                body,
                read: false,
                created_at: Utc::now(),
            })
            .await;
        if let Err(why) = result {
            warn!("booking: notification write failed: {:?}", why);
        }
    }

    /// Best-effort audit write.
    async fn audit(
        &self,
        actor_id: Option<&Id<User>>,
        action: &str,
        entity_type: &str,
        entity_id: &str,
    ) {
        let result = self
            .database
            .auto()
            .insert_audit_log(AuditLogEntry {
                actor_id: actor_id.cloned(),
                action: action.to_owned(),
                entity_type: Some(entity_type.to_owned()),
                entity_id: Some(entity_id.to_owned()),
                details: serde_json::Value::Null,
                created_at: Utc::now(),
            })
            .await;
        if let Err(why) = result {
            warn!("booking: audit write failed: {:?}", why);
        }
    }
}
