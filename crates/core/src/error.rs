//! Domain error model.

use thiserror::Error;

use crate::job::StatusKind;
use crate::validation::ValidationError;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation, invariants,
/// malformed identifiers). Store, broker and executor failures belong to the
/// infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Client input was rejected by the input validator.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A status change would move a job backwards (or off a terminal status).
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: StatusKind, to: StatusKind },

    /// A value did not name a known status or task.
    #[error("unknown {field}: {value}")]
    UnknownValue { field: &'static str, value: String },
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown(field: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownValue {
            field,
            value: value.into(),
        }
    }
}
