use carpool::database::Result;
use model::{user::User, WithId};
use sqlx::{types::Json, Executor, Postgres};
use utility::{id::Id, let_also::LetAlso};

use crate::data_model::{new_row_id, user::UserRow, with_id};

use super::convert_error;

pub async fn get<'c, E>(executor: E, id: &Id<User>) -> Result<WithId<User>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UserRow>(
        "
        SELECT
            id, email_lookup_hash, password_hash, oauth_identity,
            encrypted_profile, role, is_active, email_verified, mfa_enabled,
            docs_verified, rating, organization_id, notification_prefs_json
        FROM
            users
        WHERE
            id = $1;
        ",
    )
    .bind(id.raw_ref::<str>())
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: UserRow| with_id(row))
}

pub async fn by_email_hash<'c, E>(
    executor: E,
    email_lookup_hash: &str,
) -> Result<Option<WithId<User>>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UserRow>(
        "
        SELECT
            id, email_lookup_hash, password_hash, oauth_identity,
            encrypted_profile, role, is_active, email_verified, mfa_enabled,
            docs_verified, rating, organization_id, notification_prefs_json
        FROM
            users
        WHERE
            email_lookup_hash = $1;
        ",
    )
    .bind(email_lookup_hash)
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?
    .map(|row: UserRow| with_id(row))
    .transpose()
}

pub async fn insert<'c, E>(executor: E, user: User) -> Result<WithId<User>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UserRow>(
        "
        INSERT INTO users(
            id, email_lookup_hash, password_hash, oauth_identity,
            encrypted_profile, role, is_active, email_verified, mfa_enabled,
            docs_verified, rating, organization_id, notification_prefs_json
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING *;
        ",
    )
    .bind(new_row_id())
    .bind(user.email_lookup_hash)
    .bind(user.password_hash)
    .bind(user.oauth_identity)
    .bind(user.encrypted_profile)
    .bind(user.role.as_str())
    .bind(user.flags.active)
    .bind(user.flags.email_verified)
    .bind(user.flags.mfa_enabled)
    .bind(user.flags.docs_verified)
    .bind(user.rating)
    .bind(user.organization_id)
    .bind(Json(user.notification_prefs))
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: UserRow| with_id(row))
}

/// Refreshes the driver's aggregate rating from completed-trip reviews.
pub async fn recompute_driver_rating<'c, E>(
    executor: E,
    driver_id: &Id<User>,
) -> Result<Option<f64>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        "
        UPDATE users
        SET rating = sub.avg_rating
        FROM (
            SELECT AVG(p.rating)::float8 AS avg_rating
            FROM trip_participants p
            JOIN trips t ON p.trip_id = t.id
            WHERE t.driver_id = $1 AND p.rating IS NOT NULL
        ) sub
        WHERE id = $1
        RETURNING rating;
        ",
    )
    .bind(driver_id.raw_ref::<str>())
    .fetch_optional(executor)
    .await
    .map_err(convert_error)
    .map(|row: Option<Option<f64>>| row.flatten())
}
