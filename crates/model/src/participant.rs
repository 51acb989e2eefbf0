use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{
    trip::{Location, Trip},
    user::User,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Driver,
    Rider,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Rider => "rider",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Requested,
    Accepted,
    Rejected,
    Completed,
    Cancelled,
}

impl ParticipantStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Paid,
    Failed,
    Canceled,
    Refunded,
}

impl PaymentStatus {
    /// Legal edges form a DAG: unpaid → pending → {paid, failed, canceled},
    /// paid → refunded. No backward edges, except failed/canceled retries
    /// re-entering pending via a fresh intent.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Unpaid, Pending)
                | (Pending, Paid)
                | (Pending, Failed)
                | (Pending, Canceled)
                | (Failed, Pending)
                | (Canceled, Pending)
                | (Paid, Refunded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Refunded => "refunded",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    NotDue,
    Pending,
    Paid,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotDue => "not_due",
            Self::Pending => "pending",
            Self::Paid => "paid",
        }
    }
}

/// A user's membership on a trip. Unique per `(trip_id, user_id)`. A
/// participant in `accepted` holds `seats_held` seats of the trip's
/// inventory.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub trip_id: Id<Trip>,
    pub user_id: Id<User>,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    pub seats_held: i32,
    pub pickup: Option<Location>,
    pub dropoff: Option<Location>,
    pub payment_intent_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_completed_at: Option<DateTime<Utc>>,
    pub payout_status: PayoutStatus,
    pub rating: Option<i32>,
    #[serde(skip)]
    pub encrypted_review: Option<Vec<u8>>,
    pub requested_at: DateTime<Utc>,
}

impl HasId for Participant {
    type IdType = String;
}

#[cfg(test)]
mod tests {
    use super::PaymentStatus::*;

    #[test]
    fn payment_transitions_form_a_dag() {
        assert!(Unpaid.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Failed));
        assert!(Paid.can_transition_to(Refunded));
        // no backward edges
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Unpaid));
        assert!(!Refunded.can_transition_to(Paid));
        assert!(!Pending.can_transition_to(Unpaid));
    }
}
