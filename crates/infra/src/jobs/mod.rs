//! Job lifecycle services.
//!
//! ## Components
//!
//! - `SubmissionService`: validate, record (`Queued`), announce, enqueue
//! - `Worker`: consume work items, run the executor, store the outcome
//! - `JobService`: list/get/update jobs, serve artifacts, clean up completed jobs

pub mod service;
pub mod submission;
pub mod worker;

pub use service::{Download, JobService, QueryError, UpdateError};
pub use submission::{SubmissionService, SubmitError};
pub use worker::{Plan, Processed, SkipReason, Worker, WorkerConfig, WorkerHandle, WorkerStats, plan};
