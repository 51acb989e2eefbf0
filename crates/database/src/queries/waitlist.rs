use carpool::database::Result;
use model::{trip::Trip, waitlist::WaitlistEntry, WithId};
use sqlx::{Executor, Postgres};
use utility::{id::Id, let_also::LetAlso};

use crate::data_model::{new_row_id, waitlist::WaitlistRow, with_id};

use super::convert_error;

pub async fn join<'c, E>(
    executor: E,
    entry: WaitlistEntry,
) -> Result<WithId<WaitlistEntry>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, WaitlistRow>(
        "
        INSERT INTO trip_waitlist(
            id, trip_id, user_id, seats_needed,
            pickup_lat, pickup_lng, pickup_address,
            dropoff_lat, dropoff_lng, dropoff_address,
            status, joined_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *;
        ",
    )
    .bind(new_row_id())
    .bind(entry.trip_id.raw())
    .bind(entry.user_id.raw())
    .bind(entry.seats_needed)
    .bind(entry.pickup.as_ref().map(|location| location.latitude))
    .bind(entry.pickup.as_ref().map(|location| location.longitude))
    .bind(entry.pickup.as_ref().and_then(|location| location.address.clone()))
    .bind(entry.dropoff.as_ref().map(|location| location.latitude))
    .bind(entry.dropoff.as_ref().map(|location| location.longitude))
    .bind(entry.dropoff.as_ref().and_then(|location| location.address.clone()))
    .bind(entry.status.as_str())
    .bind(entry.joined_at)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: WaitlistRow| with_id(row))
}

/// FIFO head of the waitlist that fits the released seats.
pub async fn oldest_waiting<'c, E>(
    executor: E,
    trip_id: &Id<Trip>,
    max_seats: i32,
) -> Result<Option<WithId<WaitlistEntry>>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, WaitlistRow>(
        "
        SELECT
            id, trip_id, user_id, seats_needed,
            pickup_lat, pickup_lng, pickup_address,
            dropoff_lat, dropoff_lng, dropoff_address,
            status, joined_at
        FROM
            trip_waitlist
        WHERE
            trip_id = $1 AND status = 'waiting' AND seats_needed <= $2
        ORDER BY joined_at
        LIMIT 1;
        ",
    )
    .bind(trip_id.raw_ref::<str>())
    .bind(max_seats)
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?
    .map(|row: WaitlistRow| with_id(row))
    .transpose()
}

pub async fn promote<'c, E>(executor: E, id: &Id<WaitlistEntry>) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE trip_waitlist
        SET status = 'promoted'
        WHERE id = $1 AND status = 'waiting';
        ",
    )
    .bind(id.raw_ref::<str>())
    .execute(executor)
    .await
    .map_err(convert_error)
    .map(|result| result.rows_affected())
}
