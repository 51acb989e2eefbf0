use carpool::database::Result;
use chrono::{DateTime, Utc};
use model::{
    trip::{Trip, TripStatus},
    WithId,
};
use sqlx::{types::Json, Executor, Postgres};
use utility::{
    geo::{self, Point},
    id::Id,
};
use utility::let_also::LetAlso;

use crate::data_model::{new_row_id, trip::TripRow, with_id, with_ids};

use super::{convert_error, status_placeholders};

const COLUMNS: &str = "id, driver_id, origin_lat, origin_lng, origin_address, \
     destination_lat, destination_lng, destination_address, departure_time, \
     arrival_time, total_seats, available_seats, price_per_seat, currency, \
     vehicle_json, status";

pub async fn get<'c, E>(executor: E, id: &Id<Trip>) -> Result<WithId<Trip>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, TripRow>(
        "
        SELECT
            id, driver_id, origin_lat, origin_lng, origin_address,
            destination_lat, destination_lng, destination_address,
            departure_time, arrival_time, total_seats, available_seats,
            price_per_seat, currency, vehicle_json, status
        FROM
            trips
        WHERE
            id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: TripRow| with_id(row))
}

pub async fn insert<'c, E>(executor: E, trip: Trip) -> Result<WithId<Trip>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, TripRow>(
        "
        INSERT INTO trips(
            id, driver_id, origin_lat, origin_lng, origin_address,
            destination_lat, destination_lng, destination_address,
            departure_time, arrival_time, total_seats, available_seats,
            price_per_seat, currency, vehicle_json, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
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
    .bind(trip.departure_time)
    .bind(trip.arrival_time)
    .bind(trip.total_seats)
    .bind(trip.available_seats)
    .bind(trip.price_per_seat)
    .bind(trip.currency)
    .bind(Json(trip.vehicle))
    .bind(trip.status.as_str())
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: TripRow| with_id(row))
}

/// The seat-taking guard. The availability predicate makes racing
/// reservations serialise on the row; the loser affects 0 rows.
pub async fn reserve_seats<'c, E>(
    executor: E,
    id: &Id<Trip>,
    seats: i32,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE trips
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

pub async fn release_seats<'c, E>(
    executor: E,
    id: &Id<Trip>,
    seats: i32,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE trips
        SET available_seats = LEAST(available_seats + $2, total_seats)
        WHERE id = $1;
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
    id: &Id<Trip>,
    from: &[TripStatus],
    to: TripStatus,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = format!(
        "UPDATE trips SET status = $2 WHERE id = $1 AND status IN ({});",
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

pub async fn find_available<'c, E>(
    executor: E,
    pickup: Point,
    radius_km: f64,
    departure_after: DateTime<Utc>,
    seats: i32,
) -> Result<Vec<WithId<Trip>>>
where
    E: Executor<'c, Database = Postgres>,
{
    let bbox = geo::bounding_box(&[pickup], radius_km);
    sqlx::query_as(&format!(
        "
        SELECT
            {}
        FROM
            trips
        WHERE
            status = 'scheduled'
            AND available_seats >= $1
            AND departure_time >= $2
            AND origin_lat BETWEEN $3 AND $4
            AND origin_lng BETWEEN $5 AND $6
        ORDER BY departure_time;
        ",
        COLUMNS
    ))
    .bind(seats)
    .bind(departure_after)
    .bind(bbox.min_lat)
    .bind(bbox.max_lat)
    .bind(bbox.min_lng)
    .bind(bbox.max_lng)
    .fetch_all(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|rows: Vec<TripRow>| with_ids(rows))
}
