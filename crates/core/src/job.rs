//! Job record, status machine, work items and change events.
//!
//! The job record is the single source of truth for a scan job. Its status only
//! ever moves forward along `Queued -> Started -> {Completed | Failed}`:
//!
//! ```text
//! rank:  Queued(0) -> Started(1) -> Completed(2)
//!                               \-> Failed(2)
//! ```
//!
//! Re-entering the current status is allowed (a redelivered work item restarts
//! the visible `Started` status), skipping ahead is allowed, moving backwards or
//! switching between terminal statuses is not.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Status without its payload; used for filtering, storage fields and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusKind {
    Queued,
    Started,
    Completed,
    Failed,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Queued => "Queued",
            StatusKind::Started => "Started",
            StatusKind::Completed => "Completed",
            StatusKind::Failed => "Failed",
        }
    }

    /// Position in the lifecycle ordering.
    pub fn rank(&self) -> u8 {
        match self {
            StatusKind::Queued => 0,
            StatusKind::Started => 1,
            StatusKind::Completed | StatusKind::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }
}

impl core::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(StatusKind::Queued),
            "started" => Ok(StatusKind::Started),
            "completed" => Ok(StatusKind::Completed),
            "failed" => Ok(StatusKind::Failed),
            _ => Err(DomainError::unknown("status", s)),
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Persisted and enqueued, waiting for a worker.
    Queued,
    /// A worker owns the job and is running the executor.
    Started,
    /// Executor succeeded and the artifact has been written.
    Completed,
    /// Executor or output decoding failed.
    Failed { reason: String },
}

impl JobStatus {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Rebuild a status from its stored parts. A missing failure reason is kept
    /// as an empty string.
    pub fn from_parts(kind: StatusKind, reason: Option<String>) -> Self {
        match kind {
            StatusKind::Queued => JobStatus::Queued,
            StatusKind::Started => JobStatus::Started,
            StatusKind::Completed => JobStatus::Completed,
            StatusKind::Failed => JobStatus::Failed {
                reason: reason.unwrap_or_default(),
            },
        }
    }

    pub fn kind(&self) -> StatusKind {
        match self {
            JobStatus::Queued => StatusKind::Queued,
            JobStatus::Started => StatusKind::Started,
            JobStatus::Completed => StatusKind::Completed,
            JobStatus::Failed { .. } => StatusKind::Failed,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            JobStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        let (from, to) = (self.kind(), next.kind());
        if from.is_terminal() {
            return from == to;
        }
        to.rank() >= from.rank()
    }

    pub fn check_transition(&self, next: &JobStatus) -> DomainResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: self.kind(),
                to: next.kind(),
            })
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            JobStatus::Failed { reason } if !reason.is_empty() => write!(f, "Failed: {reason}"),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

/// Tag telling observers which kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Create,
    Update,
    Delete,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Create => "create",
            Task::Update => "update",
            Task::Delete => "delete",
        }
    }
}

impl core::fmt::Display for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Task::Create),
            "update" => Ok(Task::Update),
            "delete" => Ok(Task::Delete),
            _ => Err(DomainError::unknown("task", s)),
        }
    }
}

/// Flat JSON shape shared by records and events: `status` is the bare name and
/// a failure reason, when present, sits next to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecordWire {
    id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
    status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    task: Task,
}

/// The canonical job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "JobRecordWire", from = "JobRecordWire")]
pub struct JobRecord {
    pub id: JobId,
    pub arguments: String,
    pub status: JobStatus,
    pub task: Task,
}

impl JobRecord {
    /// A freshly submitted job.
    pub fn queued(id: JobId, arguments: impl Into<String>) -> Self {
        Self {
            id,
            arguments: arguments.into(),
            status: JobStatus::Queued,
            task: Task::Create,
        }
    }

    /// Move to `next`, refusing backward transitions. Marks the record as updated.
    pub fn transition(&mut self, next: JobStatus) -> DomainResult<()> {
        self.status.check_transition(&next)?;
        self.status = next;
        self.task = Task::Update;
        Ok(())
    }

    pub fn change_event(&self) -> ChangeEvent {
        ChangeEvent {
            id: self.id,
            status: self.status.clone(),
            task: self.task,
        }
    }
}

impl From<JobRecord> for JobRecordWire {
    fn from(r: JobRecord) -> Self {
        Self {
            id: r.id,
            arguments: Some(r.arguments),
            status: r.status.kind(),
            reason: r.status.reason().map(str::to_owned),
            task: r.task,
        }
    }
}

impl From<JobRecordWire> for JobRecord {
    fn from(w: JobRecordWire) -> Self {
        Self {
            id: w.id,
            arguments: w.arguments.unwrap_or_default(),
            status: JobStatus::from_parts(w.status, w.reason),
            task: w.task,
        }
    }
}

/// Notification broadcast on every job record mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "JobRecordWire", from = "JobRecordWire")]
pub struct ChangeEvent {
    pub id: JobId,
    pub status: JobStatus,
    pub task: Task,
}

impl ChangeEvent {
    /// Same event, re-tagged (e.g. as a deletion).
    pub fn with_task(mut self, task: Task) -> Self {
        self.task = task;
        self
    }
}

impl From<ChangeEvent> for JobRecordWire {
    fn from(e: ChangeEvent) -> Self {
        Self {
            id: e.id,
            arguments: None,
            status: e.status.kind(),
            reason: e.status.reason().map(str::to_owned),
            task: e.task,
        }
    }
}

impl From<JobRecordWire> for ChangeEvent {
    fn from(w: JobRecordWire) -> Self {
        Self {
            id: w.id,
            status: JobStatus::from_parts(w.status, w.reason),
            task: w.task,
        }
    }
}

/// Queue message asking a worker to run a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(alias = "uuid")]
    pub id: JobId,
    #[serde(alias = "args")]
    pub arguments: String,
}

impl WorkItem {
    pub fn for_record(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            arguments: record.arguments.clone(),
        }
    }
}
