use carpool::database::Result;
use chrono::Utc;
use model::matching::MatchConfig;
use sqlx::{types::Json, Executor, Postgres};

use crate::data_model::decode_json;

use super::convert_error;

pub async fn get<'c, E>(executor: E, tenant: &str) -> Result<Option<MatchConfig>>
where
    E: Executor<'c, Database = Postgres>,
{
    let row: Option<(Json<serde_json::Value>,)> = sqlx::query_as(
        "
        SELECT config_json FROM matching_config WHERE tenant = $1;
        ",
    )
    .bind(tenant)
    .fetch_optional(executor)
    .await
    .map_err(convert_error)?;
    row.map(|(json,)| decode_json::<MatchConfig>("config_json", json.0))
        .transpose()
}

pub async fn put<'c, E>(executor: E, tenant: &str, config: &MatchConfig) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        INSERT INTO matching_config(tenant, config_json, updated_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (tenant)
        DO UPDATE SET config_json = EXCLUDED.config_json,
                      updated_at = EXCLUDED.updated_at;
        ",
    )
    .bind(tenant)
    .bind(Json(config))
    .bind(Utc::now())
    .execute(executor)
    .await
    .map_err(convert_error)?;
    Ok(())
}
