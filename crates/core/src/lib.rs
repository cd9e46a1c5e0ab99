//! `scanqueue-core`: job lifecycle domain primitives.
//!
//! This crate contains **pure domain** types (no infrastructure concerns): the
//! job record and its status machine, queue work items, change events and the
//! input validator.

pub mod error;
pub mod id;
pub mod job;
pub mod validation;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{ChangeEvent, JobRecord, JobStatus, StatusKind, Task, WorkItem};
pub use validation::{DEFAULT_MAX_ARG_LENGTH, ValidationError, validate, validate_with_limit};
