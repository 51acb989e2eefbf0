use carpool::database::Result;
use chrono::{DateTime, Utc};
use model::ledger::IdempotencyRecord;
use sqlx::{types::Json, Executor, Postgres};

use crate::data_model::ledger::IdempotencyRow;

use super::convert_error;

/// First writer wins; replays of the same key keep the original snapshot.
pub async fn put_record<'c, E>(
    executor: E,
    key: &str,
    snapshot: &serde_json::Value,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        INSERT INTO idempotency_records(key, response_snapshot, created_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (key) DO NOTHING;
        ",
    )
    .bind(key)
    .bind(Json(snapshot))
    .bind(Utc::now())
    .execute(executor)
    .await
    .map_err(convert_error)?;
    Ok(())
}

pub async fn get_record<'c, E>(
    executor: E,
    key: &str,
) -> Result<Option<IdempotencyRecord>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, IdempotencyRow>(
        "
        SELECT
            key, response_snapshot, created_at
        FROM
            idempotency_records
        WHERE
            key = $1;
        ",
    )
    .bind(key)
    .fetch_optional(executor)
    .await
    .map_err(convert_error)
    .map(|row: Option<IdempotencyRow>| {
        row.map(|row| IdempotencyRecord {
            response_snapshot: row.response_snapshot.map(|value| value.0),
            created_at: row.created_at,
        })
    })
}

/// Returns 0 rows affected when the event id is already recorded.
pub async fn record_webhook_event<'c, E>(
    executor: E,
    event_id: &str,
    event_type: &str,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        INSERT INTO processed_webhook_events(event_id, event_type, processed_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (event_id) DO NOTHING;
        ",
    )
    .bind(event_id)
    .bind(event_type)
    .bind(Utc::now())
    .execute(executor)
    .await
    .map_err(convert_error)
    .map(|result| result.rows_affected())
}

pub async fn webhook_event_seen<'c, E>(executor: E, event_id: &str) -> Result<bool>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        "
        SELECT EXISTS(
            SELECT 1 FROM processed_webhook_events WHERE event_id = $1
        );
        ",
    )
    .bind(event_id)
    .fetch_one(executor)
    .await
    .map_err(convert_error)
}

pub async fn purge_webhook_events<'c, E>(
    executor: E,
    older_than: DateTime<Utc>,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        DELETE FROM processed_webhook_events
        WHERE processed_at < $1;
        ",
    )
    .bind(older_than)
    .execute(executor)
    .await
    .map_err(convert_error)
    .map(|result| result.rows_affected())
}
