//! Job queries, manual status updates and cleanup.

use std::sync::Arc;

use tracing::{info, warn};

use scanqueue_core::{DomainError, JobId, JobRecord, JobStatus, StatusKind, Task};

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::status_store::{StatusStore, StoreError, commit, publish_best_effort};

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error(transparent)]
    Transition(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// A downloadable artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    pub contents: Vec<u8>,
}

#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn StatusStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl JobService {
    pub fn new(store: Arc<dyn StatusStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { store, artifacts }
    }

    /// All jobs, optionally only those with the given status.
    pub fn list(&self, status: Option<StatusKind>) -> Result<Vec<JobRecord>, StoreError> {
        let mut records = self.store.list()?;
        if let Some(kind) = status {
            records.retain(|r| r.status.kind() == kind);
        }
        Ok(records)
    }

    pub fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.store.get(id)
    }

    /// Set a job's status, refusing backward moves, and announce it.
    pub fn update(&self, id: JobId, status: JobStatus, task: Task) -> Result<JobRecord, UpdateError> {
        let mut record = self.store.get(id)?.ok_or(UpdateError::NotFound(id))?;
        record.transition(status)?;
        record.task = task;
        commit(self.store.as_ref(), &record)?;
        info!(job_id = %id, status = %record.status, "job status updated");
        Ok(record)
    }

    /// The artifact of a completed job. `None` unless the job is `Completed`
    /// and its artifact exists.
    pub fn download(&self, id: JobId) -> Result<Option<Download>, QueryError> {
        let Some(record) = self.store.get(id)? else {
            return Ok(None);
        };
        if record.status != JobStatus::Completed {
            return Ok(None);
        }
        match self.artifacts.get(id) {
            Ok(contents) => Ok(Some(Download {
                file_name: self.artifacts.file_name(id),
                contents,
            })),
            Err(ArtifactError::Missing(_)) => {
                warn!(job_id = %id, "completed job has no artifact");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every `Completed` job and its artifact. Returns the deleted ids.
    ///
    /// A record that cannot be deleted is logged and left in place (still
    /// `Completed`, so the next call retries it); the others are still removed.
    pub fn delete_completed(&self) -> Result<Vec<JobId>, StoreError> {
        let completed: Vec<JobRecord> = self
            .store
            .list()?
            .into_iter()
            .filter(|r| r.status == JobStatus::Completed)
            .collect();

        let mut deleted = Vec::with_capacity(completed.len());
        for record in completed {
            match self.store.delete(record.id) {
                Ok(true) => {}
                // Someone else removed it first.
                Ok(false) => continue,
                Err(e) => {
                    warn!(job_id = %record.id, error = %e, "failed to delete job record");
                    continue;
                }
            }
            match self.artifacts.delete(record.id) {
                Ok(true) => {}
                Ok(false) => warn!(job_id = %record.id, "artifact already missing"),
                Err(e) => warn!(job_id = %record.id, error = %e, "failed to delete artifact"),
            }
            publish_best_effort(self.store.as_ref(), &record.change_event().with_task(Task::Delete));
            deleted.push(record.id);
        }

        info!(count = deleted.len(), "completed jobs deleted");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::FsArtifactStore;
    use crate::status_store::InMemoryStatusStore;

    struct Fixture {
        svc: JobService,
        store: Arc<InMemoryStatusStore>,
        artifacts: Arc<FsArtifactStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStatusStore::arc();
        let artifacts = Arc::new(FsArtifactStore::new(dir.path()));
        Fixture {
            svc: JobService::new(store.clone(), artifacts.clone()),
            store,
            artifacts,
            _dir: dir,
        }
    }

    fn seed(store: &InMemoryStatusStore, status: JobStatus) -> JobId {
        let mut record = JobRecord::queued(JobId::new(), "localhost");
        if status != JobStatus::Queued {
            record.transition(status).unwrap();
        }
        store.put(&record).unwrap();
        record.id
    }

    #[test]
    fn list_filters_by_status() {
        let f = fixture();
        seed(&f.store, JobStatus::Queued);
        let done = seed(&f.store, JobStatus::Completed);

        assert_eq!(f.svc.list(None).unwrap().len(), 2);
        let completed = f.svc.list(Some(StatusKind::Completed)).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done);
    }

    #[test]
    fn update_moves_forward_and_announces() {
        let f = fixture();
        let id = seed(&f.store, JobStatus::Queued);
        let events = f.store.subscribe().unwrap();

        let record = f.svc.update(id, JobStatus::Completed, Task::Update).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(f.store.get(id).unwrap().unwrap().status, JobStatus::Completed);

        let event = events.try_recv().unwrap();
        assert_eq!((event.id, event.status, event.task), (id, JobStatus::Completed, Task::Update));
    }

    #[test]
    fn update_refuses_backward_moves() {
        let f = fixture();
        let id = seed(&f.store, JobStatus::Completed);

        let err = f.svc.update(id, JobStatus::Queued, Task::Update).unwrap_err();
        assert!(matches!(err, UpdateError::Transition(DomainError::InvalidTransition { .. })));
        assert_eq!(f.store.get(id).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn update_unknown_job() {
        let f = fixture();
        let id = JobId::new();
        assert!(matches!(
            f.svc.update(id, JobStatus::Started, Task::Update),
            Err(UpdateError::NotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn download_requires_completed_job_and_artifact() {
        let f = fixture();
        let queued = seed(&f.store, JobStatus::Queued);
        f.artifacts.put(queued, b"early").unwrap();
        assert!(f.svc.download(queued).unwrap().is_none());

        let done = seed(&f.store, JobStatus::Completed);
        assert!(f.svc.download(done).unwrap().is_none());

        f.artifacts.put(done, b"<nmaprun/>").unwrap();
        let download = f.svc.download(done).unwrap().unwrap();
        assert_eq!(download.contents, b"<nmaprun/>");
        assert_eq!(download.file_name, format!("{done}.xml"));

        assert!(f.svc.download(JobId::new()).unwrap().is_none());
    }

    /// Store that refuses to delete one particular record.
    struct StuckRecord {
        inner: Arc<InMemoryStatusStore>,
        stuck: JobId,
    }

    impl StatusStore for StuckRecord {
        fn put(&self, record: &JobRecord) -> Result<(), StoreError> {
            self.inner.put(record)
        }
        fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
            self.inner.get(id)
        }
        fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
            self.inner.list()
        }
        fn delete(&self, id: JobId) -> Result<bool, StoreError> {
            if id == self.stuck {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.delete(id)
        }
        fn publish(&self, event: &scanqueue_core::ChangeEvent) -> Result<(), StoreError> {
            self.inner.publish(event)
        }
        fn subscribe(&self) -> Result<scanqueue_events::Subscription<scanqueue_core::ChangeEvent>, StoreError> {
            self.inner.subscribe()
        }
        fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping()
        }
    }

    #[test]
    fn delete_completed_reports_what_it_removed_despite_failures() {
        let f = fixture();
        let stuck = seed(&f.store, JobStatus::Completed);
        let done = seed(&f.store, JobStatus::Completed);
        f.artifacts.put(stuck, b"x").unwrap();
        let svc = JobService::new(
            Arc::new(StuckRecord {
                inner: f.store.clone(),
                stuck,
            }),
            f.artifacts.clone(),
        );

        assert_eq!(svc.delete_completed().unwrap(), vec![done]);
        assert!(f.store.get(done).unwrap().is_none());
        // Kept whole: record and artifact both still there for the next call.
        assert_eq!(f.store.get(stuck).unwrap().unwrap().status, JobStatus::Completed);
        assert_eq!(f.artifacts.get(stuck).unwrap(), b"x");
    }

    #[test]
    fn delete_completed_only_touches_completed_jobs() {
        let f = fixture();
        let queued = seed(&f.store, JobStatus::Queued);
        let failed = seed(&f.store, JobStatus::failed("boom"));
        let done = seed(&f.store, JobStatus::Completed);
        let done_without_artifact = seed(&f.store, JobStatus::Completed);
        f.artifacts.put(done, b"x").unwrap();
        let events = f.store.subscribe().unwrap();

        let mut deleted = f.svc.delete_completed().unwrap();
        deleted.sort();
        let mut expected = vec![done, done_without_artifact];
        expected.sort();
        assert_eq!(deleted, expected);

        assert!(f.store.get(queued).unwrap().is_some());
        assert!(f.store.get(failed).unwrap().is_some());
        assert!(f.store.get(done).unwrap().is_none());
        assert!(matches!(f.artifacts.get(done), Err(ArtifactError::Missing(_))));

        let tasks: Vec<Task> = std::iter::from_fn(|| events.try_recv().ok()).map(|e| e.task).collect();
        assert_eq!(tasks, vec![Task::Delete, Task::Delete]);
    }
}
