use carpool::database::Result;
use model::{
    driver_trip::DriverTrip,
    pool::{PoolAssignment, PoolMember, PoolStatus, PoolStop},
    WithId,
};
use sqlx::{types::Json, Executor, Postgres, Transaction};
use utility::id::Id;

use crate::data_model::{decode_json, decode_text, new_row_id, pool::PoolRow};

use super::convert_error;

/// Writes the assignment and all member rows inside the caller's
/// transaction, so the pool appears atomically with its members.
pub async fn insert_all(
    tx: &mut Transaction<'_, Postgres>,
    pool: PoolAssignment,
) -> Result<WithId<PoolAssignment>> {
    let pool_id = new_row_id();
    sqlx::query(
        "
        INSERT INTO pool_assignments(
            id, driver_trip_id, total_score, avg_score, seats_used,
            seats_remaining, total_detour_minutes, ordered_stops_json, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9);
        ",
    )
    .bind(&pool_id)
    .bind(pool.driver_trip_id.raw())
    .bind(pool.total_score)
    .bind(pool.avg_score)
    .bind(pool.seats_used)
    .bind(pool.seats_remaining)
    .bind(pool.total_detour_minutes)
    .bind(Json(&pool.ordered_stops))
    .bind(pool.status.as_str())
    .execute(&mut **tx)
    .await
    .map_err(convert_error)?;

    for member in &pool.members {
        sqlx::query(
            "
            INSERT INTO pool_members(
                id, pool_id, match_id, rider_id, pickup_order, dropoff_order
            )
            VALUES ($1, $2, $3, $4, $5, $6);
            ",
        )
        .bind(new_row_id())
        .bind(&pool_id)
        .bind(member.match_id.raw())
        .bind(member.rider_id.raw())
        .bind(member.pickup_order)
        .bind(member.dropoff_order)
        .execute(&mut **tx)
        .await
        .map_err(convert_error)?;
    }

    Ok(WithId::new(Id::new(pool_id), pool))
}

#[derive(Debug, sqlx::FromRow)]
pub struct PoolMemberRow {
    pub match_id: String,
    pub rider_id: String,
    pub pickup_order: i32,
    pub dropoff_order: i32,
}

pub async fn assignment_for_driver_trip<'c, E>(
    executor: E,
    driver_trip_id: &Id<DriverTrip>,
) -> Result<Option<PoolRow>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, PoolRow>(
        "
        SELECT
            id, driver_trip_id, total_score, avg_score, seats_used,
            seats_remaining, total_detour_minutes, ordered_stops_json, status
        FROM
            pool_assignments
        WHERE
            driver_trip_id = $1
        ORDER BY id
        LIMIT 1;
        ",
    )
    .bind(driver_trip_id.raw_ref::<str>())
    .fetch_optional(executor)
    .await
    .map_err(convert_error)
}

pub async fn members_for_pool<'c, E>(
    executor: E,
    pool_id: &str,
) -> Result<Vec<PoolMemberRow>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, PoolMemberRow>(
        "
        SELECT
            match_id, rider_id, pickup_order, dropoff_order
        FROM
            pool_members
        WHERE
            pool_id = $1
        ORDER BY pickup_order;
        ",
    )
    .bind(pool_id)
    .fetch_all(executor)
    .await
    .map_err(convert_error)
}

pub fn build(row: PoolRow, members: Vec<PoolMemberRow>) -> Result<WithId<PoolAssignment>> {
    let assignment = PoolAssignment {
        driver_trip_id: Id::new(row.driver_trip_id),
        members: members
            .into_iter()
            .map(|member| PoolMember {
                match_id: Id::new(member.match_id),
                rider_id: Id::new(member.rider_id),
                pickup_order: member.pickup_order,
                dropoff_order: member.dropoff_order,
            })
            .collect(),
        total_score: row.total_score,
        avg_score: row.avg_score,
        seats_used: row.seats_used,
        seats_remaining: row.seats_remaining,
        total_detour_minutes: row.total_detour_minutes,
        ordered_stops: decode_json::<Vec<PoolStop>>(
            "ordered_stops_json",
            row.ordered_stops_json.0,
        )?,
        status: decode_text::<PoolStatus>("status", &row.status)?,
    };
    Ok(WithId::new(Id::new(row.id), assignment))
}
