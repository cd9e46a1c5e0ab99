//! Job status storage and change-event publication.
//!
//! The status store is the single source of truth for job records. It is also
//! the pub/sub substrate for change events: every mutation is written first and
//! then published on the `events` topic.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use scanqueue_core::{ChangeEvent, JobId, JobRecord};
use scanqueue_events::Subscription;
use tracing::warn;

pub use in_memory::InMemoryStatusStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStatusStore;

/// Topic every change event is published on.
pub const EVENTS_CHANNEL: &str = "events";

/// Key namespace for job records.
pub const JOB_KEY_PREFIX: &str = "job:";

pub fn job_key(id: JobId) -> String {
    format!("{JOB_KEY_PREFIX}{id}")
}

/// Status store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Store not reachable (after adapter-level retries).
    #[error("status store unavailable: {0}")]
    Unavailable(String),
    /// A stored record could not be decoded.
    #[error("corrupt record under {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Job status store abstraction.
///
/// All writes are single-key and last-writer-wins; callers enforce status
/// transition rules before writing.
pub trait StatusStore: Send + Sync {
    /// Insert or overwrite a record.
    fn put(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Get a record by ID.
    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Snapshot of all records, in store iteration order.
    fn list(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Remove a record. Returns false if it did not exist.
    fn delete(&self, id: JobId) -> Result<bool, StoreError>;

    /// Broadcast a change event to current subscribers.
    fn publish(&self, event: &ChangeEvent) -> Result<(), StoreError>;

    /// Subscribe to change events published from now on.
    fn subscribe(&self) -> Result<Subscription<ChangeEvent>, StoreError>;

    /// Cheap reachability check.
    fn ping(&self) -> Result<(), StoreError>;
}

/// Write `record`, then publish its change event.
///
/// The write is authoritative; a failed publish is logged and otherwise
/// ignored (fan-out is best effort).
pub fn commit(store: &dyn StatusStore, record: &JobRecord) -> Result<(), StoreError> {
    store.put(record)?;
    publish_best_effort(store, &record.change_event());
    Ok(())
}

pub(crate) fn publish_best_effort(store: &dyn StatusStore, event: &ChangeEvent) {
    if let Err(e) = store.publish(event) {
        warn!(job_id = %event.id, task = %event.task, error = %e, "failed to publish change event");
    }
}
