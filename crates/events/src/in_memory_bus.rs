//! In-memory event bus for tests/dev.

use std::sync::Mutex;

use thiserror::Error;

use crate::bus::{
    DEFAULT_SUBSCRIPTION_CAPACITY, Delivery, EventBus, SubscriberSink, Subscription,
    subscription_channel,
};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("event bus lock poisoned")]
    Poisoned,
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Best-effort fan-out with a bounded buffer per subscriber
/// - Publishing holds the lock, so all subscribers see one global order
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<SubscriberSink<M>>>,
    capacity: usize,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Number of live subscriptions (closed ones are pruned on publish).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|sink| sink.deliver(message.clone()) != Delivery::Closed);

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (sink, subscription) = subscription_channel(self.capacity);

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(sink);
        }

        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_gets_every_message_in_order() {
        let bus = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        for i in 0..5u32 {
            bus.publish(i).unwrap();
        }

        for sub in [&a, &b] {
            let got: Vec<u32> = std::iter::from_fn(|| sub.try_recv().ok()).collect();
            assert_eq!(got, vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn late_subscribers_miss_earlier_messages() {
        let bus = InMemoryEventBus::new();
        bus.publish("early").unwrap();

        let sub = bus.subscribe();
        bus.publish("late").unwrap();

        assert_eq!(sub.try_recv().unwrap(), "late");
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let bus = InMemoryEventBus::new();
        let keep = bus.subscribe();
        let gone = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(gone);
        bus.publish(1u8).unwrap();

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.try_recv().unwrap(), 1);
    }

    #[test]
    fn slow_subscriber_does_not_block_publisher() {
        let bus = InMemoryEventBus::with_capacity(1);
        let slow = bus.subscribe();

        for i in 0..10u32 {
            bus.publish(i).unwrap();
        }

        assert_eq!(slow.try_recv().unwrap(), 0);
        assert_eq!(slow.lagged(), 9);
    }
}
