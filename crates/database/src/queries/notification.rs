use carpool::database::Result;
use model::{notification::Notification, WithId};
use sqlx::{Executor, Postgres};
use utility::let_also::LetAlso;

use crate::data_model::{new_row_id, notification::NotificationRow, with_id};

use super::convert_error;

pub async fn insert<'c, E>(
    executor: E,
    notification: Notification,
) -> Result<WithId<Notification>>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, NotificationRow>(
        "
        INSERT INTO notifications(
            id, user_id, kind, title, body, read, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *;
        ",
    )
    .bind(new_row_id())
    .bind(notification.user_id.raw())
    .bind(notification.kind.as_str())
    .bind(notification.title)
    .bind(notification.body)
    .bind(notification.read)
    .bind(notification.created_at)
    .fetch_one(executor)
    .await
    .map_err(convert_error)?
    .let_owned(|row: NotificationRow| with_id(row))
}
