//! Job submission: validate, record, announce, enqueue.

use std::sync::Arc;

use tracing::{error, info};

use scanqueue_core::{DEFAULT_MAX_ARG_LENGTH, JobId, JobRecord, ValidationError, WorkItem, validate_with_limit};

use crate::queue::{QueueError, WorkQueue};
use crate::status_store::{StatusStore, StoreError, commit};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Rejected input. Nothing was recorded or enqueued.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// The record could not be written. Nothing was enqueued.
    #[error("failed to record job: {0}")]
    Store(#[from] StoreError),
    /// The record exists (status `Queued`) but no work item reached the queue.
    #[error("job {id} was recorded but could not be enqueued: {source}")]
    Enqueue {
        id: JobId,
        #[source]
        source: QueueError,
    },
}

#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn StatusStore>,
    queue: Arc<dyn WorkQueue>,
    max_arg_length: usize,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn StatusStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            store,
            queue,
            max_arg_length: DEFAULT_MAX_ARG_LENGTH,
        }
    }

    pub fn with_max_arg_length(mut self, max: usize) -> Self {
        self.max_arg_length = max;
        self
    }

    /// Submit a scan with the given arguments and return its new id.
    pub fn submit(&self, arguments: &str) -> Result<JobId, SubmitError> {
        validate_with_limit(arguments, self.max_arg_length)?;

        let record = JobRecord::queued(JobId::new(), arguments);
        commit(self.store.as_ref(), &record)?;

        // TODO: the record write and the enqueue are not atomic. A sweep that
        // re-enqueues records left `Queued` past a deadline would close the gap.
        if let Err(source) = self.queue.enqueue(&WorkItem::for_record(&record)) {
            error!(job_id = %record.id, error = %source, "job recorded but not enqueued");
            return Err(SubmitError::Enqueue {
                id: record.id,
                source,
            });
        }

        info!(job_id = %record.id, "job submitted");
        Ok(record.id)
    }
}
