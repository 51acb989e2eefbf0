use carpool::database::Result;
use chrono::{DateTime, Utc};
use model::{session::Session, WithId};
use sqlx::{Executor, Postgres};
use utility::{id::Id, let_also::LetAlso};

use crate::data_model::{new_row_id, session::SessionRow, with_id};

use super::convert_error;

pub async fn insert<'c, E>(executor: E, session: Session) -> Result<WithId<Session>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, SessionRow>(
        "
        INSERT INTO sessions(
            id, user_id, refresh_token_hash, expires_at, last_accessed, active
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *;
        ",
    )
    .bind(new_row_id())
    .bind(session.user_id.raw())
    .bind(session.refresh_token_hash)
    .bind(session.expires_at)
    .bind(session.last_accessed)
    .bind(session.active)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: SessionRow| with_id(row))
}

pub async fn by_token_hash<'c, E>(
    executor: E,
    refresh_token_hash: &str,
) -> Result<Option<WithId<Session>>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, SessionRow>(
        "
        SELECT
            id, user_id, refresh_token_hash, expires_at, last_accessed, active
        FROM
            sessions
        WHERE
            refresh_token_hash = $1 AND active;
        ",
    )
    .bind(refresh_token_hash)
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?
    .map(|row: SessionRow| with_id(row))
    .transpose()
}

/// Rotation is one guarded write: the old hash sits in the predicate, so a
/// replayed or concurrently rotated token updates nothing.
pub async fn rotate<'c, E>(
    executor: E,
    id: &Id<Session>,
    old_hash: &str,
    new_hash: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE sessions
        SET refresh_token_hash = $3, expires_at = $4, last_accessed = $5
        WHERE id = $1 AND refresh_token_hash = $2 AND active;
        ",
    )
    .bind(id.raw_ref::<str>())
    .bind(old_hash)
    .bind(new_hash)
    .bind(expires_at)
    .bind(now)
    .execute(executor)
    .await
    .map_err(convert_error)
    .map(|result| result.rows_affected())
}

pub async fn deactivate_by_hash<'c, E>(
    executor: E,
    refresh_token_hash: &str,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        UPDATE sessions
        SET active = FALSE
        WHERE refresh_token_hash = $1 AND active;
        ",
    )
    .bind(refresh_token_hash)
    .execute(executor)
    .await
    .map_err(convert_error)
    .map(|result| result.rows_affected())
}

pub async fn purge_expired<'c, E>(executor: E, now: DateTime<Utc>) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        DELETE FROM sessions
        WHERE expires_at < $1 OR NOT active;
        ",
    )
    .bind(now)
    .execute(executor)
    .await
    .map_err(convert_error)
    .map(|result| result.rows_affected())
}
