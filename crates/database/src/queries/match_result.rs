use carpool::database::Result;
use model::{
    driver_trip::DriverTrip,
    matching::{MatchResult, MatchStatus},
    rider_request::RiderRequest,
    WithId,
};
use sqlx::{types::Json, Executor, Postgres};
use utility::{id::Id, let_also::LetAlso};

use crate::data_model::{match_result::MatchResultRow, new_row_id, with_id, with_ids};

use super::{convert_error, status_placeholders};

pub async fn get<'c, E>(executor: E, id: &Id<MatchResult>) -> Result<WithId<MatchResult>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, MatchResultRow>(
        "
        SELECT
            id, driver_trip_id, rider_request_id, driver_id, rider_id,
            score, breakdown_json, estimated_pickup_time, detour_minutes,
            pickup_distance_km, carbon_saved_kg, explanation, status,
            created_at
        FROM
            match_results
        WHERE
            id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: MatchResultRow| with_id(row))
}

/// Idempotent on the driver/request pair: re-matching refreshes the score
/// columns while id, status and creation time stay put.
pub async fn upsert<'c, E>(
    executor: E,
    result: MatchResult,
) -> Result<WithId<MatchResult>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, MatchResultRow>(
        "
        INSERT INTO match_results(
            id, driver_trip_id, rider_request_id, driver_id, rider_id,
            score, breakdown_json, estimated_pickup_time, detour_minutes,
            pickup_distance_km, carbon_saved_kg, explanation, status,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (driver_trip_id, rider_request_id)
        DO UPDATE SET
            score = EXCLUDED.score,
            breakdown_json = EXCLUDED.breakdown_json,
            estimated_pickup_time = EXCLUDED.estimated_pickup_time,
            detour_minutes = EXCLUDED.detour_minutes,
            pickup_distance_km = EXCLUDED.pickup_distance_km,
            carbon_saved_kg = EXCLUDED.carbon_saved_kg,
            explanation = EXCLUDED.explanation
        RETURNING *;
        ",
    )
    .bind(new_row_id())
    .bind(result.driver_trip_id.raw())
    .bind(result.rider_request_id.raw())
    .bind(result.driver_id.raw())
    .bind(result.rider_id.raw())
    .bind(result.score)
    .bind(Json(result.breakdown))
    .bind(result.estimated_pickup_time)
    .bind(result.detour_minutes)
    .bind(result.pickup_distance_km)
    .bind(result.carbon_saved_kg)
    .bind(result.explanation)
    .bind(result.status.as_str())
    .bind(result.created_at)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: MatchResultRow| with_id(row))
}

pub async fn for_request<'c, E>(
    executor: E,
    request_id: &Id<RiderRequest>,
) -> Result<Vec<WithId<MatchResult>>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, MatchResultRow>(
        "
        SELECT
            id, driver_trip_id, rider_request_id, driver_id, rider_id,
            score, breakdown_json, estimated_pickup_time, detour_minutes,
            pickup_distance_km, carbon_saved_kg, explanation, status,
            created_at
        FROM
            match_results
        WHERE
            rider_request_id = $1
        ORDER BY score;
        ",
    )
    .bind(request_id.raw_ref::<str>())
    .fetch_all(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|rows: Vec<MatchResultRow>| with_ids(rows))
}

pub async fn pending_for_driver_trip<'c, E>(
    executor: E,
    driver_trip_id: &Id<DriverTrip>,
) -> Result<Vec<WithId<MatchResult>>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, MatchResultRow>(
        "
        SELECT
            id, driver_trip_id, rider_request_id, driver_id, rider_id,
            score, breakdown_json, estimated_pickup_time, detour_minutes,
            pickup_distance_km, carbon_saved_kg, explanation, status,
            created_at
        FROM
            match_results
        WHERE
            driver_trip_id = $1 AND status = 'pending'
        ORDER BY score;
        ",
    )
    .bind(driver_trip_id.raw_ref::<str>())
    .fetch_all(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|rows: Vec<MatchResultRow>| with_ids(rows))
}

pub async fn transition<'c, E>(
    executor: E,
    id: &Id<MatchResult>,
    from: &[MatchStatus],
    to: MatchStatus,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = format!(
        "UPDATE match_results SET status = $2 WHERE id = $1 AND status IN ({});",
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
