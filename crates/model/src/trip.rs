use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::{
    geo::Point,
    id::{HasId, Id},
};

use crate::user::User;

/// A geographic place with an optional human-readable address.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            address: None,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.latitude, self.longitude)
    }
}

/// Vehicle details carried as a JSON blob on the trip row.
/// Unknown fields from older clients are tolerated on read.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub make: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
    pub license_plate: Option<String>,
    #[serde(default)]
    pub wheelchair_accessible: bool,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
    Expired,
}

impl TripStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Cancelling is only allowed before completion; cancelled is terminal.
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// A driver's trip as seen by the seat inventory and the booking state
/// machine. Seat accounting invariant: `0 <= available_seats <= total_seats`,
/// and the seats held by accepted participants plus `available_seats` always
/// equal `total_seats`.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub driver_id: Id<User>,
    pub origin: Location,
    pub destination: Location,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub total_seats: i32,
    pub available_seats: i32,
    pub price_per_seat: f64,
    pub currency: String,
    pub vehicle: Vehicle,
    pub status: TripStatus,
}

impl HasId for Trip {
    type IdType = String;
}

impl Trip {
    /// Amount in minor units a rider owes for `seats` seats.
    pub fn amount_minor_for(&self, seats: i32) -> i64 {
        (self.price_per_seat * 100.0 * seats as f64).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_is_price_times_seats_in_minor_units() {
        let trip = Trip {
            driver_id: Id::new("driver".to_owned()),
            origin: Location::new(-26.2041, 28.0473),
            destination: Location::new(-26.1076, 28.0567),
            departure_time: Utc::now(),
            arrival_time: None,
            total_seats: 4,
            available_seats: 4,
            price_per_seat: 40.0,
            currency: "zar".to_owned(),
            vehicle: Vehicle::default(),
            status: TripStatus::Scheduled,
        };
        assert_eq!(trip.amount_minor_for(1), 4000);
        assert_eq!(trip.amount_minor_for(3), 12000);
    }

    #[test]
    fn cancelled_is_terminal() {
        assert!(TripStatus::Cancelled.is_terminal());
        assert!(!TripStatus::Cancelled.can_cancel());
        assert!(TripStatus::Active.can_cancel());
    }
}
