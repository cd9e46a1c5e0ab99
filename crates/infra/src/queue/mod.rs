//! Durable work queue with manual acknowledgment.
//!
//! Producers ([`WorkQueue`]) append work items; each consumer
//! ([`WorkConsumer`]) holds at most one unacknowledged message at a time
//! (prefetch = 1). A message is removed only by [`WorkConsumer::ack`]; a
//! message that is released, or whose consumer goes away, is delivered again
//! with `redelivered = true`. Delivery is therefore at-least-once and
//! consumers must tolerate duplicates.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

use std::time::Duration;

use scanqueue_core::WorkItem;

pub use in_memory::{InMemoryConsumer, InMemoryWorkQueue};
#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsConsumer, RedisStreamsQueue};

pub const DEFAULT_QUEUE_NAME: &str = "job_queue";

/// One delivery handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Opaque handle for `ack`/`release`.
    pub delivery_tag: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// Broker not reachable. Transient: retry after backoff.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// `receive` called while a delivery is still outstanding.
    #[error("delivery {0} is still unacknowledged")]
    Unacked(String),
    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl QueueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

/// Producer side of the queue.
pub trait WorkQueue: Send + Sync {
    /// Create the queue if needed. Idempotent.
    fn declare(&self) -> Result<(), QueueError>;

    /// Append a work item. Returns once the broker has accepted it.
    fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError>;
}

/// Consumer side of the queue.
pub trait WorkConsumer: Send {
    /// Wait up to `timeout` for the next delivery.
    fn receive(&mut self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError>;

    /// Remove an outstanding delivery from the queue for good.
    fn ack(&mut self, delivery_tag: &str) -> Result<(), QueueError>;

    /// Give an outstanding delivery back so it is delivered again.
    fn release(&mut self, delivery_tag: &str) -> Result<(), QueueError>;
}

/// JSON body for a work item.
pub fn encode_item(item: &WorkItem) -> Result<Vec<u8>, QueueError> {
    serde_json::to_vec(item).map_err(|e| QueueError::Serialization(e.to_string()))
}
