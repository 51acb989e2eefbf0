use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::Id;

use crate::{participant::Participant, trip::Trip, user::User};

/// Domain events published on the in-process bus for SSE fan-out. Delivery
/// is best-effort; subscribers re-fetch authoritative state from the stores.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    #[serde(rename = "trip:created")]
    TripCreated {
        trip_id: Id<Trip>,
        driver_id: Id<User>,
    },
    #[serde(rename = "trip:cancelled")]
    TripCancelled {
        trip_id: Id<Trip>,
        driver_id: Id<User>,
    },
    #[serde(rename = "booking:requested")]
    BookingRequested {
        trip_id: Id<Trip>,
        participant_id: Id<Participant>,
        rider_id: Id<User>,
        driver_id: Id<User>,
    },
    #[serde(rename = "booking:accepted")]
    BookingAccepted {
        trip_id: Id<Trip>,
        participant_id: Id<Participant>,
        rider_id: Id<User>,
    },
    #[serde(rename = "booking:rejected")]
    BookingRejected {
        trip_id: Id<Trip>,
        participant_id: Id<Participant>,
        rider_id: Id<User>,
    },
    #[serde(rename = "payment:succeeded")]
    PaymentSucceeded {
        trip_id: Id<Trip>,
        participant_id: Id<Participant>,
        user_id: Id<User>,
        amount_minor: i64,
    },
    #[serde(rename = "payment:failed")]
    PaymentFailed {
        trip_id: Id<Trip>,
        participant_id: Id<Participant>,
        user_id: Id<User>,
    },
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::TripCreated { .. } => "trip:created",
            Self::TripCancelled { .. } => "trip:cancelled",
            Self::BookingRequested { .. } => "booking:requested",
            Self::BookingAccepted { .. } => "booking:accepted",
            Self::BookingRejected { .. } => "booking:rejected",
            Self::PaymentSucceeded { .. } => "payment:succeeded",
            Self::PaymentFailed { .. } => "payment:failed",
        }
    }

    /// Users this event concerns; the bus fans out to their topics.
    pub fn audience(&self) -> Vec<Id<User>> {
        match self {
            Self::TripCreated { driver_id, .. } => vec![driver_id.clone()],
            Self::TripCancelled { driver_id, .. } => vec![driver_id.clone()],
            Self::BookingRequested {
                rider_id,
                driver_id,
                ..
            } => vec![rider_id.clone(), driver_id.clone()],
            Self::BookingAccepted { rider_id, .. } => vec![rider_id.clone()],
            Self::BookingRejected { rider_id, .. } => vec![rider_id.clone()],
            Self::PaymentSucceeded { user_id, .. } => vec![user_id.clone()],
            Self::PaymentFailed { user_id, .. } => vec![user_id.clone()],
        }
    }
}
