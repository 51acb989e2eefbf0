use carpool::database::Result;
use model::{audit::AuditLogEntry, WithId};
use sqlx::{types::Json, Executor, Postgres};
use utility::{id::IdWrapper as _, let_also::LetAlso};

use crate::data_model::{audit::AuditRow, new_row_id, with_id};

use super::convert_error;

pub async fn insert<'c, E>(
    executor: E,
    entry: AuditLogEntry,
) -> Result<WithId<AuditLogEntry>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, AuditRow>(
        "
        INSERT INTO audit_logs(
            id, actor_id, action, entity_type, entity_id, details_json, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *;
        ",
    )
    .bind(new_row_id())
    .bind(entry.actor_id.raw())
    .bind(entry.action)
    .bind(entry.entity_type)
    .bind(entry.entity_id)
    .bind(Json(entry.details))
    .bind(entry.created_at)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: AuditRow| with_id(row))
}
