use std::fmt::Debug;

use serde::Serialize;
use utility::id::{HasId, Id};

pub mod audit;
pub mod driver_trip;
pub mod event;
pub mod ledger;
pub mod matching;
pub mod notification;
pub mod participant;
pub mod pool;
pub mod rider_request;
pub mod session;
pub mod trip;
pub mod user;
pub mod waitlist;

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct WithId<V>
where
    V: HasId,
    V::IdType: Serialize + Debug + Clone,
{
    pub id: Id<V>,
    #[serde(flatten)]
    pub content: V,
}

impl<V> WithId<V>
where
    V: HasId,
    V::IdType: Serialize + Debug + Clone,
{
    pub fn new(id: Id<V>, content: V) -> Self {
        Self { id, content }
    }
}
