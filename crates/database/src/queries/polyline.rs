use carpool::database::Result;
use chrono::Utc;
use sqlx::{Executor, Postgres};
use utility::geo::Point;

use super::convert_error;

/// Cache key at ~10 m resolution; near-identical endpoints share a route.
fn point_key(point: Point) -> String {
    format!("{:.4},{:.4}", point.latitude, point.longitude)
}

pub async fn get<'c, E>(
    executor: E,
    origin: Point,
    destination: Point,
) -> Result<Option<String>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        "
        SELECT polyline FROM route_polylines
        WHERE origin_key = $1 AND destination_key = $2;
        ",
    )
    .bind(point_key(origin))
    .bind(point_key(destination))
    .fetch_optional(executor)
    .await
    .map_err(convert_error)
}

pub async fn put<'c, E>(
    executor: E,
    origin: Point,
    destination: Point,
    polyline: &str,
) -> Result<()>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "
        INSERT INTO route_polylines(origin_key, destination_key, polyline, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (origin_key, destination_key)
        DO UPDATE SET polyline = EXCLUDED.polyline;
        ",
    )
    .bind(point_key(origin))
    .bind(point_key(destination))
    .bind(polyline)
    .bind(Utc::now())
    .execute(executor)
    .await
    .map_err(convert_error)?;
    Ok(())
}
