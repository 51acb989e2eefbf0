use carpool::database::Result;
use chrono::{DateTime, Utc};
use model::{
    participant::{Participant, ParticipantStatus, PaymentStatus},
    trip::Trip,
    user::User,
    WithId,
};
use sqlx::{Executor, Postgres};
use utility::{id::Id, let_also::LetAlso};

use crate::data_model::{new_row_id, participant::ParticipantRow, with_id, with_ids};

use super::{convert_error, status_placeholders};

pub async fn get<'c, E>(executor: E, id: &Id<Participant>) -> Result<WithId<Participant>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, ParticipantRow>(
        "
        SELECT
            id, trip_id, user_id, role, status, seats_held,
            pickup_lat, pickup_lng, pickup_address,
            dropoff_lat, dropoff_lng, dropoff_address,
            payment_intent_id, payment_status, payment_completed_at,
            payout_status, rating, encrypted_review, requested_at
        FROM
            trip_participants
        WHERE
            id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: ParticipantRow| with_id(row))
}

pub async fn for_user<'c, E>(
    executor: E,
    trip_id: &Id<Trip>,
    user_id: &Id<User>,
) -> Result<Option<WithId<Participant>>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, ParticipantRow>(
        "
        SELECT
            id, trip_id, user_id, role, status, seats_held,
            pickup_lat, pickup_lng, pickup_address,
            dropoff_lat, dropoff_lng, dropoff_address,
            payment_intent_id, payment_status, payment_completed_at,
            payout_status, rating, encrypted_review, requested_at
        FROM
            trip_participants
        WHERE
            trip_id = $1 AND user_id = $2;
        ",
    )
    .bind(trip_id.raw_ref::<str>())
    .bind(user_id.raw_ref::<str>())
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?
    .map(|row: ParticipantRow| with_id(row))
    .transpose()
}

pub async fn for_trip<'c, E>(
    executor: E,
    trip_id: &Id<Trip>,
) -> Result<Vec<WithId<Participant>>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, ParticipantRow>(
        "
        SELECT
            id, trip_id, user_id, role, status, seats_held,
            pickup_lat, pickup_lng, pickup_address,
            dropoff_lat, dropoff_lng, dropoff_address,
            payment_intent_id, payment_status, payment_completed_at,
            payout_status, rating, encrypted_review, requested_at
        FROM
            trip_participants
        WHERE
            trip_id = $1
        ORDER BY requested_at;
        ",
    )
    .bind(trip_id.raw_ref::<str>())
    .fetch_all(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|rows: Vec<ParticipantRow>| with_ids(rows))
}

pub async fn insert<'c, E>(
    executor: E,
    participant: Participant,
) -> Result<WithId<Participant>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, ParticipantRow>(
        "
        INSERT INTO trip_participants(
            id, trip_id, user_id, role, status, seats_held,
            pickup_lat, pickup_lng, pickup_address,
            dropoff_lat, dropoff_lng, dropoff_address,
            payment_intent_id, payment_status, payment_completed_at,
            payout_status, rating, encrypted_review, requested_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19)
        RETURNING *;
        ",
    )
    .bind(new_row_id())
    .bind(participant.trip_id.raw())
    .bind(participant.user_id.raw())
    .bind(participant.role.as_str())
    .bind(participant.status.as_str())
    .bind(participant.seats_held)
    .bind(participant.pickup.as_ref().map(|location| location.latitude))
    .bind(participant.pickup.as_ref().map(|location| location.longitude))
    .bind(participant.pickup.as_ref().and_then(|location| location.address.clone()))
    .bind(participant.dropoff.as_ref().map(|location| location.latitude))
    .bind(participant.dropoff.as_ref().map(|location| location.longitude))
    .bind(participant.dropoff.as_ref().and_then(|location| location.address.clone()))
    .bind(participant.payment_intent_id)
    .bind(participant.payment_status.as_str())
    .bind(participant.payment_completed_at)
    .bind(participant.payout_status.as_str())
    .bind(participant.rating)
    .bind(participant.encrypted_review)
    .bind(participant.requested_at)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: ParticipantRow| with_id(row))
}

pub async fn transition<'c, E>(
    executor: E,
    id: &Id<Participant>,
    from: &[ParticipantStatus],
    to: ParticipantStatus,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = format!(
        "UPDATE trip_participants SET status = $2 WHERE id = $1 AND status IN ({});",
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

/// Attaches an intent unless one is already pending; the predicate decides
/// the winner between concurrent intent creations.
pub async fn set_payment_intent<'c, E>(
    executor: E,
    id: &Id<Participant>,
    intent_id: &str,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE trip_participants
        SET payment_intent_id = $2, payment_status = 'pending'
        WHERE id = $1
          AND (payment_intent_id IS NULL OR payment_status != 'pending');
        ",
    )
    .bind(id.raw_ref::<str>())
    .bind(intent_id)
    .execute(executor)
    .await
    .map_err(convert_error)
    .map(|result| result.rows_affected())
}

/// Payment-status guard scoped to one intent, so events for superseded
/// intents drop out as 0 rows.
pub async fn apply_payment_transition<'c, E>(
    executor: E,
    id: &Id<Participant>,
    intent_id: &str,
    from: &[PaymentStatus],
    to: PaymentStatus,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = format!(
        "
        UPDATE trip_participants
        SET payment_status = $2,
            payment_completed_at = COALESCE($3, payment_completed_at)
        WHERE id = $1
          AND payment_intent_id = $4
          AND payment_status IN ({});
        ",
        status_placeholders(from.len(), 5)
    );
    let mut statement = sqlx::query(&query)
        .bind(id.raw_ref::<str>())
        .bind(to.as_str())
        .bind(completed_at)
        .bind(intent_id);
    for status in from {
        statement = statement.bind(status.as_str());
    }
    statement
        .execute(executor)
        .await
        .map_err(convert_error)
        .map(|result| result.rows_affected())
}

/// Ratings are once-only; the NULL check makes repeats no-ops.
pub async fn record_rating<'c, E>(
    executor: E,
    id: &Id<Participant>,
    rating: i32,
    encrypted_review: Option<Vec<u8>>,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE trip_participants
        SET rating = $2, encrypted_review = $3
        WHERE id = $1 AND status = 'completed' AND rating IS NULL;
        ",
    )
    .bind(id.raw_ref::<str>())
    .bind(rating)
    .bind(encrypted_review)
    .execute(executor)
    .await
    .map_err(convert_error)
    .map(|result| result.rows_affected())
}
