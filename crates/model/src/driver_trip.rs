use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::{
    geo::{self, BoundingBox, Point},
    id::{HasId, Id},
};

use crate::{
    trip::{Location, Vehicle},
    user::User,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Offered,
    Matched,
    Completed,
    Cancelled,
    Expired,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offered => "offered",
            Self::Matched => "matched",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// A driver's posted offer as seen by the matching subsystem. The bounding
/// box is derived from origin/destination padded by the tenant's search
/// radius and is what the candidate pre-filter queries against.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverTrip {
    pub driver_id: Id<User>,
    pub origin: Location,
    pub destination: Location,
    pub bbox: BoundingBox,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub total_seats: i32,
    pub available_seats: i32,
    pub price_per_seat: f64,
    pub currency: String,
    pub vehicle: Vehicle,
    pub status: OfferStatus,
    /// Encoded road geometry from the route provider, when available. The
    /// matcher falls back to the straight origin→destination segment.
    pub polyline: Option<String>,
    pub driver_rating: Option<f64>,
    pub organization_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HasId for DriverTrip {
    type IdType = String;
}

impl DriverTrip {
    pub fn bounding_box_for(origin: &Location, destination: &Location, pad_km: f64) -> BoundingBox {
        geo::bounding_box(&[origin.point(), destination.point()], pad_km)
    }

    /// The driver's route for corridor checks: decoded polyline when present,
    /// otherwise the straight origin→destination segment.
    pub fn route(&self) -> Vec<Point> {
        self.polyline
            .as_deref()
            .and_then(geo::decode_polyline)
            .filter(|points| points.len() >= 2)
            .unwrap_or_else(|| vec![self.origin.point(), self.destination.point()])
    }
}
