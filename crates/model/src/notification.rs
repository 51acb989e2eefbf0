use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::user::User;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingRequested,
    BookingAccepted,
    BookingRejected,
    TripCancelled,
    WaitlistPromoted,
    PaymentSucceeded,
    PaymentFailed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingRequested => "booking_requested",
            Self::BookingAccepted => "booking_accepted",
            Self::BookingRejected => "booking_rejected",
            Self::TripCancelled => "trip_cancelled",
            Self::WaitlistPromoted => "waitlist_promoted",
            Self::PaymentSucceeded => "payment_succeeded",
            Self::PaymentFailed => "payment_failed",
        }
    }
}

/// A persisted in-app notification. Writes are best-effort; delivery fan-out
/// happens over the event bus for connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: Id<User>,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl HasId for Notification {
    type IdType = String;
}
