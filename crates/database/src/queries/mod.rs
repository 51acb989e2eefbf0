use carpool::database::DatabaseError;

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

const UNIQUE_VIOLATION: &str = "23505";

pub(crate) fn convert_error(why: sqlx::Error) -> DatabaseError {
    match &why {
        sqlx::Error::RowNotFound => DatabaseError::NotFound,
        sqlx::Error::Database(db)
            if db.code().as_deref() == Some(UNIQUE_VIOLATION) =>
        {
            DatabaseError::Conflict(db.message().to_owned())
        }
        _ => DatabaseError::Other(Box::new(why)),
    }
}

/// Builds the `status IN (...)` placeholder list for guarded updates, with
/// placeholders starting at `first_index`.
pub(crate) fn status_placeholders(count: usize, first_index: usize) -> String {
    (0..count)
        .map(|offset| format!("${}", first_index + offset))
        .collect::<Vec<_>>()
        .join(", ")
}
