//! Change-event distribution mechanics.

pub mod bus;
pub mod in_memory_bus;

pub use bus::{
    DEFAULT_SUBSCRIPTION_CAPACITY, Delivery, EventBus, SubscriberSink, Subscription,
    subscription_channel,
};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
