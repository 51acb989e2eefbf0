use carpool::database::Result;
use chrono::Duration;
use model::{
    driver_trip::{DriverTrip, OfferStatus},
    matching::MatchConfig,
    rider_request::RiderRequest,
    WithId,
};
use sqlx::{types::Json, Executor, Postgres};
use utility::{id::Id, let_also::LetAlso};

use crate::data_model::{driver_trip::DriverTripRow, new_row_id, with_id, with_ids};

use super::{convert_error, status_placeholders};

pub async fn get<'c, E>(executor: E, id: &Id<DriverTrip>) -> Result<WithId<DriverTrip>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, DriverTripRow>(
        "
        SELECT
            id, driver_id, origin_lat, origin_lng, origin_address,
            destination_lat, destination_lng, destination_address,
            bbox_min_lat, bbox_max_lat, bbox_min_lng, bbox_max_lng,
            departure_time, arrival_time, total_seats, available_seats,
            price_per_seat, currency, vehicle_json, status, polyline,
            driver_rating, organization_id, created_at
        FROM
            driver_trips
        WHERE
            id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: DriverTripRow| with_id(row))
}

pub async fn insert<'c, E>(executor: E, trip: DriverTrip) -> Result<WithId<DriverTrip>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, DriverTripRow>(
        "
        INSERT INTO driver_trips(
            id, driver_id, origin_lat, origin_lng, origin_address,
            destination_lat, destination_lng, destination_address,
            bbox_min_lat, bbox_max_lat, bbox_min_lng, bbox_max_lng,
            departure_time, arrival_time, total_seats, available_seats,
            price_per_seat, currency, vehicle_json, status, polyline,
            driver_rating, organization_id, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
        RETURNING *;
        ",
    )
    .bind(new_row_id())
    .bind(trip.driver_id.raw())
    .bind(trip.origin.latitude)
    .bind(trip.origin.longitude)
    .bind(trip.origin.address)
    .bind(trip.destination.latitude)
    .bind(trip.destination.longitude)
    .bind(trip.destination.address)
    .bind(trip.bbox.min_lat)
    .bind(trip.bbox.max_lat)
    .bind(trip.bbox.min_lng)
    .bind(trip.bbox.max_lng)
    .bind(trip.departure_time)
    .bind(trip.arrival_time)
    .bind(trip.total_seats)
    .bind(trip.available_seats)
    .bind(trip.price_per_seat)
    .bind(trip.currency)
    .bind(Json(trip.vehicle))
    .bind(trip.status.as_str())
    .bind(trip.polyline)
    .bind(trip.driver_rating)
    .bind(trip.organization_id)
    .bind(trip.created_at)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: DriverTripRow| with_id(row))
}

/// The Phase A pre-filter: a single predicate over offer status, seat
/// availability, the slack-padded departure window and the offer's bounding
/// box; closest departure to the rider's window midpoint first.
pub async fn find_candidates<'c, E>(
    executor: E,
    request: &RiderRequest,
    config: &MatchConfig,
) -> Result<Vec<WithId<DriverTrip>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let slack = Duration::minutes(config.time_slack_min);
    sqlx::query_as::<_, DriverTripRow>(
        "
        SELECT
            id, driver_id, origin_lat, origin_lng, origin_address,
            destination_lat, destination_lng, destination_address,
            bbox_min_lat, bbox_max_lat, bbox_min_lng, bbox_max_lng,
            departure_time, arrival_time, total_seats, available_seats,
            price_per_seat, currency, vehicle_json, status, polyline,
            driver_rating, organization_id, created_at
        FROM
            driver_trips
        WHERE
            status = 'offered'
            AND available_seats >= $1
            AND departure_time BETWEEN $2 AND $3
            AND bbox_min_lat <= $4 AND bbox_max_lat >= $4
            AND bbox_min_lng <= $5 AND bbox_max_lng >= $5
        ORDER BY ABS(EXTRACT(EPOCH FROM (departure_time - $6::timestamptz)))
        LIMIT $7;
        ",
    )
    .bind(request.seats_needed)
    .bind(request.earliest_departure - slack)
    .bind(request.latest_departure + slack)
    .bind(request.pickup.latitude)
    .bind(request.pickup.longitude)
    .bind(request.mid_window())
    .bind(config.max_candidates as i64)
    .fetch_all(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|rows: Vec<DriverTripRow>| with_ids(rows))
}

pub async fn reserve_seats<'c, E>(
    executor: E,
    id: &Id<DriverTrip>,
    seats: i32,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE driver_trips
        SET available_seats = available_seats - $2
        WHERE id = $1 AND available_seats >= $2;
        ",
    )
    .bind(id.raw_ref::<str>())
    .bind(seats)
    .execute(executor)
    .await
    .map_err(convert_error)
    .map(|result| result.rows_affected())
}

pub async fn transition<'c, E>(
    executor: E,
    id: &Id<DriverTrip>,
    from: &[OfferStatus],
    to: OfferStatus,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = format!(
        "UPDATE driver_trips SET status = $2 WHERE id = $1 AND status IN ({});",
        status_placeholders(from.len(), 3)
    );
    let mut statement = sqlx::query(&query)
        .bind(id.raw_ref::<str>())
        .bind(to.as_str());
    for status in from {
        statement = statement.bind(status.as_str());
    }
    statement
        .execute(executor)
        .await
        .map_err(convert_error)
        .map(|result| result.rows_affected())
}
