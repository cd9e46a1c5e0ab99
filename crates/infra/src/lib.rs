//! Infrastructure layer: status store, work queue, artifacts, executor and the
//! job lifecycle services built on them.

pub mod artifacts;
pub mod config;
pub mod executor;
pub mod jobs;
pub mod queue;
#[cfg(feature = "redis")]
pub mod redis_conn;
pub mod retry;
pub mod status_store;

pub use config::Settings;
pub use retry::RetryPolicy;
