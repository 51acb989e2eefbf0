use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{driver_trip::DriverTrip, rider_request::RiderRequest, user::User};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Expired,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// Per-term contributions to a composite score, persisted as a JSON blob so
/// the admin stats view can explain past decisions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreBreakdown {
    pub detour: f64,
    pub pickup: f64,
    pub time: f64,
    pub rating: f64,
    pub org: f64,
    pub carbon: f64,
}

/// A scored pairing of one driver offer and one rider request. Write-once by
/// the matcher; only `status` is mutated afterwards, by the booking flow.
/// Unique per `(driver_trip_id, rider_request_id)`. Lower score is better.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub driver_trip_id: Id<DriverTrip>,
    pub rider_request_id: Id<RiderRequest>,
    pub driver_id: Id<User>,
    pub rider_id: Id<User>,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub estimated_pickup_time: DateTime<Utc>,
    pub detour_minutes: f64,
    pub pickup_distance_km: f64,
    pub carbon_saved_kg: f64,
    pub explanation: String,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
}

impl HasId for MatchResult {
    type IdType = String;
}

/// Scoring weights. Configured values are authoritative; they are not
/// re-normalised after the carbon bonus is subtracted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreWeights {
    pub detour: f64,
    pub pickup: f64,
    pub time: f64,
    pub rating: f64,
    pub org: f64,
    pub carbon: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            detour: 0.30,
            pickup: 0.25,
            time: 0.20,
            rating: 0.15,
            org: 0.05,
            carbon: 0.05,
        }
    }
}

/// Per-tenant matching configuration, persisted as a JSON blob and cached
/// for 60 seconds. Unknown fields are tolerated on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchConfig {
    pub search_radius_km: f64,
    pub time_slack_min: i64,
    pub max_pickup_distance_km: f64,
    pub max_dropoff_distance_km: f64,
    pub max_detour_min: f64,
    pub max_pool_detour_min: f64,
    pub avg_speed_km_h: f64,
    pub min_driver_rating: f64,
    pub max_results: usize,
    pub max_candidates: usize,
    pub enable_multi_rider: bool,
    pub weights: ScoreWeights,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            search_radius_km: 5.0,
            time_slack_min: 30,
            max_pickup_distance_km: 2.0,
            max_dropoff_distance_km: 2.0,
            max_detour_min: 15.0,
            max_pool_detour_min: 25.0,
            avg_speed_km_h: 40.0,
            min_driver_rating: 0.0,
            max_results: 10,
            max_candidates: 200,
            enable_multi_rider: false,
            weights: ScoreWeights::default(),
        }
    }
}

impl HasId for MatchConfig {
    // keyed by tenant (organization id or the "default" tenant)
    type IdType = String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one_before_carbon_bonus() {
        let w = ScoreWeights::default();
        let sum = w.detour + w.pickup + w.time + w.rating + w.org;
        assert!((sum - 0.95).abs() < 1e-9);
        assert!((sum + w.carbon - 1.0).abs() < 1e-9);
    }

    #[test]
    fn config_tolerates_unknown_fields() {
        let parsed: MatchConfig = serde_json::from_str(
            r#"{"searchRadiusKm": 8.0, "futureKnob": true}"#,
        )
        .expect("lenient parse");
        assert_eq!(parsed.search_radius_km, 8.0);
        assert_eq!(parsed.max_results, 10);
    }
}
