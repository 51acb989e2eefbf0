use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{driver_trip::DriverTrip, trip::Location, user::User};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Matched,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matched => "matched",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum OrgPreference {
    #[default]
    Any,
    Preferred,
    Strict,
}

/// Rider-side matching preferences, persisted as a JSON blob. Unknown fields
/// are tolerated on read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RiderPreferences {
    pub min_driver_rating: Option<f64>,
    pub wheelchair_needed: bool,
    pub same_org: OrgPreference,
}

/// A rider's posted need for a ride within a departure window.
/// Invariant: `earliest_departure < latest_departure`.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RiderRequest {
    pub rider_id: Id<User>,
    pub pickup: Location,
    pub dropoff: Location,
    pub earliest_departure: DateTime<Utc>,
    pub latest_departure: DateTime<Utc>,
    pub seats_needed: i32,
    pub preferences: RiderPreferences,
    pub status: RequestStatus,
    pub matched_trip_id: Option<Id<DriverTrip>>,
    pub organization_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HasId for RiderRequest {
    type IdType = String;
}

impl RiderRequest {
    /// Midpoint of the departure window, the reference the matcher sorts and
    /// scores departure offsets against.
    pub fn mid_window(&self) -> DateTime<Utc> {
        let half = (self.latest_departure - self.earliest_departure) / 2;
        self.earliest_departure + half
    }

    pub fn window_half_width_min(&self) -> f64 {
        (self.latest_departure - self.earliest_departure).num_seconds() as f64 / 120.0
    }
}
