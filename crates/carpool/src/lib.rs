pub mod auth;
pub mod booking;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod events;
pub mod kv;
pub mod ledger;
pub mod matching;
pub mod payment_provider;
pub mod payments;
pub mod routing;
pub mod stripe;

pub use error::{Error, Result};

/// A value that may be the stored response of an earlier request carrying
/// the same idempotency key.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Replayable<T> {
    #[serde(flatten)]
    pub value: T,
    pub replay: bool,
}

impl<T> Replayable<T> {
    pub fn fresh(value: T) -> Self {
        Self {
            value,
            replay: false,
        }
    }

    pub fn replayed(value: T) -> Self {
        Self {
            value,
            replay: true,
        }
    }
}
