use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{
    driver_trip::DriverTrip, matching::MatchResult, trip::Location, user::User,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Proposed,
    Confirmed,
    Cancelled,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One rider inside a pool. References the match that admitted the rider;
/// the match must belong to the pool's driver trip.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolMember {
    pub match_id: Id<MatchResult>,
    pub rider_id: Id<User>,
    pub pickup_order: i32,
    pub dropoff_order: i32,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Pickup,
    Dropoff,
}

/// A stop on the pooled route, persisted as part of the ordered-stops JSON
/// blob.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolStop {
    pub kind: StopKind,
    pub rider_id: Id<User>,
    pub location: Location,
}

/// A multi-rider assignment against a single driver trip, created atomically
/// with its member matches.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolAssignment {
    pub driver_trip_id: Id<DriverTrip>,
    pub members: Vec<PoolMember>,
    pub total_score: f64,
    pub avg_score: f64,
    pub seats_used: i32,
    pub seats_remaining: i32,
    pub total_detour_minutes: f64,
    pub ordered_stops: Vec<PoolStop>,
    pub status: PoolStatus,
}

impl HasId for PoolAssignment {
    type IdType = String;
}
