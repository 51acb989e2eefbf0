use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use model::{event::DomainEvent, user::User};
use tokio::sync::broadcast;
use utility::id::Id;

const SUBSCRIBER_QUEUE: usize = 64;

/// Single-process, non-durable pub/sub for SSE fan-out. Each user id is a
/// topic backed by a bounded broadcast channel; slow consumers lag and lose
/// the oldest events rather than ever blocking an emitter. Authoritative
/// state lives in the stores, so subscribers re-fetch on receipt.
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<DomainEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes to every user the event concerns. Never blocks; events for
    /// users without subscribers are dropped.
    pub fn publish(&self, event: &DomainEvent) {
        for user_id in event.audience() {
            self.emit_to(&user_id, event.clone());
        }
    }

    pub fn emit_to(&self, user_id: &Id<User>, event: DomainEvent) {
        // hold the lock only long enough to snapshot the sender
        let sender = {
            let mut topics = self.topics.lock().expect("event bus lock poisoned");
            match topics.get(&user_id.raw()) {
                Some(sender) if sender.receiver_count() > 0 => Some(sender.clone()),
                Some(_) => {
                    topics.remove(&user_id.raw());
                    None
                }
                None => None,
            }
        };
        if let Some(sender) = sender {
            // send only fails with no receivers, which is fine here
            let _ = sender.send(event);
        }
    }

    /// Subscribes to a user's topic. Dropping the receiver ends the
    /// subscription; the topic entry is reaped on the next publish.
    pub fn subscribe(&self, user_id: &Id<User>) -> broadcast::Receiver<DomainEvent> {
        let mut topics = self.topics.lock().expect("event bus lock poisoned");
        topics
            .entry(user_id.raw())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_QUEUE).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use model::trip::Trip;

    use super::*;

    fn event_for(user: &str) -> DomainEvent {
        DomainEvent::TripCreated {
            trip_id: Id::<Trip>::new("trip-1".to_owned()),
            driver_id: Id::new(user.to_owned()),
        }
    }

    #[tokio::test]
    async fn delivers_to_subscribed_user() {
        let bus = EventBus::new();
        let driver = Id::new("driver-1".to_owned());
        let mut rx = bus.subscribe(&driver);
        bus.publish(&event_for("driver-1"));
        let event = rx.recv().await.expect("event");
        assert_eq!(event.topic(), "trip:created");
    }

    #[tokio::test]
    async fn does_not_block_without_subscribers() {
        let bus = EventBus::new();
        // no subscriber for this user; publish must be a no-op
        bus.publish(&event_for("driver-2"));
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_events() {
        let bus = EventBus::new();
        let driver = Id::new("driver-3".to_owned());
        let mut rx = bus.subscribe(&driver);
        for _ in 0..(SUBSCRIBER_QUEUE + 8) {
            bus.publish(&event_for("driver-3"));
        }
        // the first recv reports the lag instead of blocking the emitter
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                assert!(missed >= 8)
            }
            other => panic!("expected lag, got {:?}", other),
        }
    }
}
