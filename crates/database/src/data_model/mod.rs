use carpool::database::{DatabaseError, Result};
use model::WithId;
use serde::de::DeserializeOwned;
use utility::id::{HasId, Id};

pub mod audit;
pub mod config;
pub mod driver_trip;
pub mod ledger;
pub mod match_result;
pub mod notification;
pub mod participant;
pub mod polyline;
pub mod pool;
pub mod rider_request;
pub mod session;
pub mod trip;
pub mod user;
pub mod waitlist;

/// A table row that converts to and from its domain model. Status and JSON
/// columns can hold text a newer/older deployment wrote, so conversion is
/// fallible and surfaces corrupt columns as database errors.
pub(crate) trait DatabaseRow: Sized {
    type Model: HasId<IdType = String> + serde::Serialize;

    fn get_id(&self) -> Id<Self::Model>;

    fn to_model(self) -> Result<Self::Model>;
}

pub(crate) fn with_id<R>(row: R) -> Result<WithId<R::Model>>
where
    R: DatabaseRow,
{
    let id = row.get_id();
    Ok(WithId::new(id, row.to_model()?))
}

pub(crate) fn with_ids<R>(rows: Vec<R>) -> Result<Vec<WithId<R::Model>>>
where
    R: DatabaseRow,
{
    rows.into_iter().map(with_id).collect()
}

/// Decodes an enum stored as its snake_case text form.
pub(crate) fn decode_text<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned())).map_err(|_| {
        DatabaseError::Other(
            format!("corrupt value {:?} in column {}", raw, column).into(),
        )
    })
}

/// Decodes a JSON blob column, tolerating unknown fields.
pub(crate) fn decode_json<T: DeserializeOwned>(
    column: &str,
    raw: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(raw).map_err(|why| {
        DatabaseError::Other(
            format!("corrupt json in column {}: {}", column, why).into(),
        )
    })
}

pub(crate) fn new_row_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
