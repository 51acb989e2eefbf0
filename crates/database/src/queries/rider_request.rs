use carpool::database::Result;
use model::{
    driver_trip::DriverTrip,
    rider_request::{RequestStatus, RiderRequest},
    WithId,
};
use sqlx::{types::Json, Executor, Postgres};
use utility::{
    id::{Id, IdWrapper as _},
    let_also::LetAlso,
};

use crate::data_model::{new_row_id, rider_request::RiderRequestRow, with_id, with_ids};

use super::{convert_error, status_placeholders};

pub async fn get<'c, E>(
    executor: E,
    id: &Id<RiderRequest>,
) -> Result<WithId<RiderRequest>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, RiderRequestRow>(
        "
        SELECT
            id, rider_id, pickup_lat, pickup_lng, pickup_address,
            dropoff_lat, dropoff_lng, dropoff_address,
            earliest_departure, latest_departure, seats_needed,
            preferences_json, status, matched_trip_id, organization_id,
            created_at
        FROM
            rider_requests
        WHERE
            id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: RiderRequestRow| with_id(row))
}

pub async fn insert<'c, E>(
    executor: E,
    request: RiderRequest,
) -> Result<WithId<RiderRequest>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, RiderRequestRow>(
        "
        INSERT INTO rider_requests(
            id, rider_id, pickup_lat, pickup_lng, pickup_address,
            dropoff_lat, dropoff_lng, dropoff_address,
            earliest_departure, latest_departure, seats_needed,
            preferences_json, status, matched_trip_id, organization_id,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING *;
        ",
    )
    .bind(new_row_id())
    .bind(request.rider_id.raw())
    .bind(request.pickup.latitude)
    .bind(request.pickup.longitude)
    .bind(request.pickup.address)
    .bind(request.dropoff.latitude)
    .bind(request.dropoff.longitude)
    .bind(request.dropoff.address)
    .bind(request.earliest_departure)
    .bind(request.latest_departure)
    .bind(request.seats_needed)
    .bind(Json(request.preferences))
    .bind(request.status.as_str())
    .bind(request.matched_trip_id.raw())
    .bind(request.organization_id)
    .bind(request.created_at)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: RiderRequestRow| with_id(row))
}

pub async fn pending<'c, E>(
    executor: E,
    limit: usize,
) -> Result<Vec<WithId<RiderRequest>>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, RiderRequestRow>(
        "
        SELECT
            id, rider_id, pickup_lat, pickup_lng, pickup_address,
            dropoff_lat, dropoff_lng, dropoff_address,
            earliest_departure, latest_departure, seats_needed,
            preferences_json, status, matched_trip_id, organization_id,
            created_at
        FROM
            rider_requests
        WHERE
            status = 'pending'
        ORDER BY created_at
        LIMIT $1;
        ",
    )
    .bind(limit as i64)
    .fetch_all(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|rows: Vec<RiderRequestRow>| with_ids(rows))
}

pub async fn transition<'c, E>(
    executor: E,
    id: &Id<RiderRequest>,
    from: &[RequestStatus],
    to: RequestStatus,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = format!(
        "UPDATE rider_requests SET status = $2 WHERE id = $1 AND status IN ({});",
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

pub async fn set_matched_trip<'c, E>(
    executor: E,
    id: &Id<RiderRequest>,
    driver_trip_id: Option<&Id<DriverTrip>>,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE rider_requests
        SET matched_trip_id = $2
        WHERE id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .bind(driver_trip_id.raw())
    .execute(executor)
    .await
    .map_err(convert_error)?;
    Ok(())
}
