//! Worker execution loop.
//!
//! A worker owns one queue consumer and processes one delivery at a time:
//!
//! ```text
//! receive -> decode work item -> plan (from stored status)
//!   missing / terminal  -> ack, skip
//!   Queued / Started    -> write Started -> execute -> re-read status
//!                           -> write artifact (success only) -> write terminal -> ack
//! ```
//!
//! The plan is made from the stored record, not from the message, so a
//! redelivered work item is ordinary input: work that already reached a
//! terminal status is never repeated or overwritten. A delivery is acked only
//! after its terminal status is stored; if the store cannot be reached the
//! delivery is released and comes back later.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use scanqueue_core::{JobId, JobRecord, JobStatus, WorkItem};

use crate::artifacts::ArtifactStore;
use crate::executor::ScanExecutor;
use crate::queue::{QueueError, QueueMessage, WorkConsumer};
use crate::retry::RetryPolicy;
use crate::status_store::{StatusStore, StoreError, commit};

/// What to do with a delivery, given the job's stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Nothing to do; acknowledge the delivery.
    Skip(SkipReason),
    /// Run (or re-run) the job.
    Run(JobRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No record: the job was deleted (or never recorded).
    Missing,
    /// Already finished; a duplicate delivery.
    Finished(JobStatus),
}

/// Decide how to handle a delivery for a job whose stored record is `current`.
pub fn plan(current: Option<JobRecord>) -> Plan {
    match current {
        None => Plan::Skip(SkipReason::Missing),
        Some(record) if record.status.is_terminal() => Plan::Skip(SkipReason::Finished(record.status)),
        Some(record) => Plan::Run(record),
    }
}

/// Outcome of one `process_next` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Nothing arrived before the timeout.
    Idle,
    /// Undecodable payload, acked and dropped.
    Dropped,
    Skipped { id: JobId, reason: SkipReason },
    Completed(JobId),
    Failed { id: JobId, reason: String },
    /// Store unavailable; delivery given back for redelivery.
    Released(JobId),
}

enum Disposition {
    Ack(Processed),
    Release(Processed),
}

pub struct Worker<C> {
    name: String,
    consumer: C,
    store: Arc<dyn StatusStore>,
    artifacts: Arc<dyn ArtifactStore>,
    executor: Arc<dyn ScanExecutor>,
}

impl<C: WorkConsumer> Worker<C> {
    pub fn new(
        name: impl Into<String>,
        consumer: C,
        store: Arc<dyn StatusStore>,
        artifacts: Arc<dyn ArtifactStore>,
        executor: Arc<dyn ScanExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            consumer,
            store,
            artifacts,
            executor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive and fully handle at most one delivery.
    ///
    /// Errors are broker errors only; job-level failures are outcomes.
    pub fn process_next(&mut self, timeout: Duration) -> Result<Processed, QueueError> {
        let Some(msg) = self.consumer.receive(timeout)? else {
            return Ok(Processed::Idle);
        };

        match self.handle(&msg) {
            Disposition::Ack(outcome) => {
                if let Err(e) = self.consumer.ack(&msg.delivery_tag) {
                    // The delivery comes back and is skipped as finished.
                    warn!(worker = %self.name, delivery = %msg.delivery_tag, error = %e, "ack failed");
                    return Err(e);
                }
                Ok(outcome)
            }
            Disposition::Release(outcome) => {
                self.consumer.release(&msg.delivery_tag)?;
                Ok(outcome)
            }
        }
    }

    fn handle(&self, msg: &QueueMessage) -> Disposition {
        let item: WorkItem = match serde_json::from_slice(&msg.body) {
            Ok(item) => item,
            Err(e) => {
                warn!(worker = %self.name, delivery = %msg.delivery_tag, error = %e, "malformed work item dropped");
                return Disposition::Ack(Processed::Dropped);
            }
        };
        let id = item.id;

        let current = match self.store.get(id) {
            Ok(current) => current,
            Err(e) => return self.release(id, &e),
        };

        let mut record = match plan(current) {
            Plan::Skip(reason) => {
                info!(worker = %self.name, job_id = %id, redelivered = msg.redelivered, ?reason, "delivery skipped");
                return Disposition::Ack(Processed::Skipped { id, reason });
            }
            Plan::Run(record) => record,
        };

        if let Err(e) = self.write_status(&mut record, JobStatus::Started) {
            return self.release(id, &e);
        }
        info!(worker = %self.name, job_id = %id, redelivered = msg.redelivered, "job started");

        let started = Instant::now();
        let output = self.run(&record);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match self.finish(&mut record, output) {
            Ok(outcome) => {
                match &outcome {
                    Processed::Completed(_) => info!(worker = %self.name, job_id = %id, elapsed_ms, "job completed"),
                    Processed::Failed { reason, .. } => {
                        warn!(worker = %self.name, job_id = %id, elapsed_ms, reason = %reason, "job failed")
                    }
                    _ => info!(worker = %self.name, job_id = %id, elapsed_ms, "scan result discarded"),
                }
                Disposition::Ack(outcome)
            }
            Err(e) => self.release(id, &e),
        }
    }

    /// Execute and decode. `Err` carries the failure reason. Nothing is stored.
    fn run(&self, record: &JobRecord) -> Result<String, String> {
        let output = self.executor.execute(&record.arguments).map_err(|e| e.to_string())?;
        String::from_utf8(output).map_err(|e| format!("could not decode scan output: {e}"))
    }

    fn write_status(&self, record: &mut JobRecord, status: JobStatus) -> Result<(), StoreError> {
        if let Err(e) = record.transition(status) {
            // Plan only yields non-terminal records, so this cannot happen.
            error!(job_id = %record.id, error = %e, "unexpected transition");
            return Ok(());
        }
        commit(self.store.as_ref(), record)
    }

    /// Store the outcome unless the job was finished or deleted meanwhile.
    ///
    /// The artifact is written only right before `Completed` is committed; on
    /// every other path any artifact for the job is removed.
    fn finish(&self, record: &mut JobRecord, output: Result<String, String>) -> Result<Processed, StoreError> {
        let id = record.id;
        match self.store.get(id)? {
            Some(latest) if latest.status.is_terminal() => {
                warn!(job_id = %id, stored = %latest.status, "job finished elsewhere, keeping stored status");
                if latest.status != JobStatus::Completed {
                    self.discard_artifact(id);
                }
                Ok(Processed::Skipped {
                    id,
                    reason: SkipReason::Finished(latest.status),
                })
            }
            None => {
                warn!(job_id = %id, "job deleted while running");
                self.discard_artifact(id);
                Ok(Processed::Skipped {
                    id,
                    reason: SkipReason::Missing,
                })
            }
            Some(_) => {
                let reason = match output {
                    Ok(text) => match self.artifacts.put(id, text.as_bytes()) {
                        Ok(()) => {
                            self.write_status(record, JobStatus::Completed)?;
                            return Ok(Processed::Completed(id));
                        }
                        Err(e) => format!("could not store artifact: {e}"),
                    },
                    Err(reason) => reason,
                };
                self.discard_artifact(id);
                self.write_status(record, JobStatus::failed(reason.clone()))?;
                Ok(Processed::Failed { id, reason })
            }
        }
    }

    fn discard_artifact(&self, id: JobId) {
        match self.artifacts.delete(id) {
            Ok(true) => debug!(job_id = %id, "stale artifact removed"),
            Ok(false) => {}
            Err(e) => warn!(job_id = %id, error = %e, "failed to remove stale artifact"),
        }
    }

    fn release(&self, id: JobId, e: &StoreError) -> Disposition {
        error!(worker = %self.name, job_id = %id, error = %e, "status store unavailable, releasing delivery");
        Disposition::Release(Processed::Released(id))
    }
}

/// Worker runtime settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long one receive waits before checking for shutdown.
    pub poll_interval: Duration,
    /// Backoff after broker errors and releases. Never gives up.
    pub reconnect: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            reconnect: RetryPolicy::forever(Duration::from_millis(200), Duration::from_secs(10)),
        }
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub released: u64,
    pub broker_errors: u64,
}

/// Handle to a worker running on its own thread.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop after the current delivery is finished, and wait for the thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl<C: WorkConsumer + 'static> Worker<C> {
    /// Run the worker loop on a dedicated thread.
    pub fn spawn(self, config: WorkerConfig) -> std::io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let loop_stats = stats.clone();

        let join = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker_loop(self, config, shutdown_rx, loop_stats))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop<C: WorkConsumer>(
    mut worker: Worker<C>,
    config: WorkerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    info!(worker = %worker.name, "worker started");
    let mut attempt = 0u32;

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        let result = worker.process_next(config.poll_interval);
        let backoff = {
            let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
            match &result {
                Ok(Processed::Idle) => false,
                Ok(Processed::Completed(_)) => {
                    s.completed += 1;
                    false
                }
                Ok(Processed::Failed { .. }) => {
                    s.failed += 1;
                    false
                }
                Ok(Processed::Skipped { .. }) => {
                    s.skipped += 1;
                    false
                }
                Ok(Processed::Dropped) => {
                    s.dropped += 1;
                    false
                }
                Ok(Processed::Released(_)) => {
                    s.released += 1;
                    true
                }
                Err(_) => {
                    s.broker_errors += 1;
                    true
                }
            }
        };

        if !backoff {
            attempt = 0;
            continue;
        }

        attempt = attempt.saturating_add(1);
        let delay = config.reconnect.delay_for_attempt(attempt);
        match &result {
            Err(QueueError::Unacked(tag)) => {
                error!(worker = %worker.name, delivery = %tag, "consumer left a delivery outstanding");
            }
            Err(e) => warn!(worker = %worker.name, attempt, delay_ms = delay.as_millis() as u64, error = %e, "broker error, backing off"),
            Ok(_) => debug!(worker = %worker.name, attempt, delay_ms = delay.as_millis() as u64, "backing off after release"),
        }

        // Sleep, but wake up for shutdown.
        match shutdown_rx.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    info!(worker = %worker.name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::artifacts::FsArtifactStore;
    use crate::executor::ExecutorError;
    use crate::queue::{InMemoryConsumer, InMemoryWorkQueue, WorkQueue};
    use crate::status_store::InMemoryStatusStore;
    use scanqueue_core::{ChangeEvent, Task};
    use scanqueue_events::Subscription;

    const WAIT: Duration = Duration::from_millis(50);

    /// In-memory store whose writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStatusStore,
        down: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl StatusStore for FlakyStore {
        fn put(&self, record: &JobRecord) -> Result<(), StoreError> {
            self.check()?;
            self.inner.put(record)
        }
        fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
            self.inner.get(id)
        }
        fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
            self.inner.list()
        }
        fn delete(&self, id: JobId) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }
        fn publish(&self, event: &ChangeEvent) -> Result<(), StoreError> {
            self.inner.publish(event)
        }
        fn subscribe(&self) -> Result<Subscription<ChangeEvent>, StoreError> {
            self.inner.subscribe()
        }
        fn ping(&self) -> Result<(), StoreError> {
            self.check()
        }
    }

    struct Fixture {
        store: Arc<FlakyStore>,
        queue: InMemoryWorkQueue,
        artifacts: Arc<FsArtifactStore>,
        runs: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                store: Arc::new(FlakyStore::default()),
                queue: InMemoryWorkQueue::new(),
                artifacts: Arc::new(FsArtifactStore::new(dir.path())),
                runs: Arc::new(AtomicUsize::new(0)),
                _dir: dir,
            }
        }

        fn worker<F>(&self, exec: F) -> Worker<InMemoryConsumer>
        where
            F: Fn(&str) -> Result<Vec<u8>, ExecutorError> + Send + Sync + 'static,
        {
            let runs = self.runs.clone();
            let counted = move |args: &str| {
                runs.fetch_add(1, Ordering::SeqCst);
                exec(args)
            };
            Worker::new(
                "test-worker",
                self.queue.consumer(),
                self.store.clone(),
                self.artifacts.clone(),
                Arc::new(counted),
            )
        }

        fn submit(&self, args: &str) -> JobId {
            let record = JobRecord::queued(JobId::new(), args);
            commit(self.store.as_ref(), &record).unwrap();
            self.queue.enqueue(&WorkItem::for_record(&record)).unwrap();
            record.id
        }

        fn status(&self, id: JobId) -> JobStatus {
            self.store.get(id).unwrap().unwrap().status
        }
    }

    fn xml(_args: &str) -> Result<Vec<u8>, ExecutorError> {
        Ok(b"<nmaprun/>".to_vec())
    }

    fn drain(sub: &Subscription<ChangeEvent>) -> Vec<(JobStatus, Task)> {
        std::iter::from_fn(|| sub.try_recv().ok())
            .map(|e| (e.status, e.task))
            .collect()
    }

    #[test]
    fn plan_is_keyed_by_stored_status() {
        let queued = JobRecord::queued(JobId::new(), "a");
        assert_eq!(plan(Some(queued.clone())), Plan::Run(queued.clone()));

        let mut started = queued.clone();
        started.transition(JobStatus::Started).unwrap();
        assert!(matches!(plan(Some(started)), Plan::Run(_)));

        let mut done = queued;
        done.transition(JobStatus::Completed).unwrap();
        assert_eq!(plan(Some(done)), Plan::Skip(SkipReason::Finished(JobStatus::Completed)));

        assert_eq!(plan(None), Plan::Skip(SkipReason::Missing));
    }

    #[test]
    fn successful_run_writes_artifact_then_completes() {
        let f = Fixture::new();
        let events = f.store.subscribe().unwrap();
        let id = f.submit("localhost");
        let mut worker = f.worker(xml);

        assert_eq!(worker.process_next(WAIT).unwrap(), Processed::Completed(id));
        assert_eq!(f.status(id), JobStatus::Completed);
        assert_eq!(f.artifacts.get(id).unwrap(), b"<nmaprun/>");
        assert_eq!(f.queue.ready_len() + f.queue.unacked_len(), 0);

        assert_eq!(
            drain(&events),
            vec![
                (JobStatus::Queued, Task::Create),
                (JobStatus::Started, Task::Update),
                (JobStatus::Completed, Task::Update),
            ]
        );
    }

    #[test]
    fn executor_error_fails_the_job_without_artifact() {
        let f = Fixture::new();
        let id = f.submit("localhost");
        let mut worker = f.worker(|_| {
            Err(ExecutorError::Exited {
                code: Some(1),
                stderr: "Failed to resolve".to_string(),
            })
        });

        let Processed::Failed { reason, .. } = worker.process_next(WAIT).unwrap() else {
            panic!("expected failure");
        };
        assert!(reason.contains("Failed to resolve"));
        assert!(matches!(f.status(id), JobStatus::Failed { .. }));
        assert!(f.artifacts.get(id).is_err());
        assert_eq!(f.queue.unacked_len(), 0);
    }

    #[test]
    fn undecodable_output_fails_the_job() {
        let f = Fixture::new();
        let id = f.submit("localhost");
        let mut worker = f.worker(|_| Ok(vec![0xff, 0xfe, 0x00]));

        worker.process_next(WAIT).unwrap();
        let JobStatus::Failed { reason } = f.status(id) else {
            panic!("expected failure");
        };
        assert!(reason.contains("decode"));
        assert!(f.artifacts.get(id).is_err());
    }

    #[test]
    fn malformed_payload_is_acked_and_dropped() {
        let f = Fixture::new();
        f.queue.push_raw(b"{not json".to_vec());
        let mut worker = f.worker(xml);

        assert_eq!(worker.process_next(WAIT).unwrap(), Processed::Dropped);
        assert_eq!(f.queue.ready_len() + f.queue.unacked_len(), 0);
        assert_eq!(f.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn redelivery_of_finished_job_is_a_no_op() {
        let f = Fixture::new();
        let id = f.submit("localhost");
        let mut worker = f.worker(xml);
        worker.process_next(WAIT).unwrap();

        // Same work item delivered again (at-least-once broker).
        let record = f.store.get(id).unwrap().unwrap();
        f.queue.enqueue(&WorkItem::for_record(&record)).unwrap();

        assert_eq!(
            worker.process_next(WAIT).unwrap(),
            Processed::Skipped {
                id,
                reason: SkipReason::Finished(JobStatus::Completed)
            }
        );
        assert_eq!(f.status(id), JobStatus::Completed);
        assert_eq!(f.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn redelivery_of_started_job_reruns_it() {
        let f = Fixture::new();
        let id = f.submit("localhost");
        let mut record = f.store.get(id).unwrap().unwrap();
        record.transition(JobStatus::Started).unwrap();
        f.store.put(&record).unwrap();
        let mut worker = f.worker(xml);

        assert_eq!(worker.process_next(WAIT).unwrap(), Processed::Completed(id));
        assert_eq!(f.status(id), JobStatus::Completed);
    }

    #[test]
    fn deleted_job_is_skipped() {
        let f = Fixture::new();
        let id = f.submit("localhost");
        f.store.delete(id).unwrap();
        let mut worker = f.worker(xml);

        assert_eq!(
            worker.process_next(WAIT).unwrap(),
            Processed::Skipped {
                id,
                reason: SkipReason::Missing
            }
        );
        assert_eq!(f.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn store_outage_releases_the_delivery() {
        let f = Fixture::new();
        let id = f.submit("localhost");
        f.store.down.store(true, Ordering::SeqCst);
        let mut worker = f.worker(xml);

        assert_eq!(worker.process_next(WAIT).unwrap(), Processed::Released(id));
        assert_eq!(f.queue.ready_len(), 1);
        assert_eq!(f.status(id), JobStatus::Queued);

        f.store.down.store(false, Ordering::SeqCst);
        assert_eq!(worker.process_next(WAIT).unwrap(), Processed::Completed(id));
    }

    #[test]
    fn terminal_status_written_elsewhere_is_kept() {
        let f = Fixture::new();
        let id = f.submit("localhost");
        let store = f.store.clone();
        let mut worker = f.worker(move |_| {
            // An operator marks the job failed while it runs.
            let mut record = store.get(id).unwrap().unwrap();
            record.transition(JobStatus::failed("cancelled")).unwrap();
            store.put(&record).unwrap();
            Ok(b"<nmaprun/>".to_vec())
        });

        assert_eq!(
            worker.process_next(WAIT).unwrap(),
            Processed::Skipped {
                id,
                reason: SkipReason::Finished(JobStatus::failed("cancelled"))
            }
        );
        assert_eq!(f.status(id), JobStatus::failed("cancelled"));
        assert!(f.artifacts.get(id).is_err());
        assert_eq!(f.queue.ready_len() + f.queue.unacked_len(), 0);
    }

    #[test]
    fn stale_artifact_is_removed_when_job_failed_elsewhere() {
        let f = Fixture::new();
        let id = f.submit("localhost");
        // Left over from an earlier attempt whose status write was lost.
        f.artifacts.put(id, b"<old/>").unwrap();
        let store = f.store.clone();
        let mut worker = f.worker(move |_| {
            let mut record = store.get(id).unwrap().unwrap();
            record.transition(JobStatus::failed("cancelled")).unwrap();
            store.put(&record).unwrap();
            Ok(b"<nmaprun/>".to_vec())
        });

        worker.process_next(WAIT).unwrap();
        assert!(f.artifacts.get(id).is_err());
    }

    #[test]
    fn job_deleted_while_running_leaves_no_artifact() {
        let f = Fixture::new();
        let id = f.submit("localhost");
        let store = f.store.clone();
        let mut worker = f.worker(move |_| {
            store.delete(id).unwrap();
            Ok(b"<nmaprun/>".to_vec())
        });

        assert_eq!(
            worker.process_next(WAIT).unwrap(),
            Processed::Skipped {
                id,
                reason: SkipReason::Missing
            }
        );
        assert!(f.store.get(id).unwrap().is_none());
        assert!(f.artifacts.get(id).is_err());
    }

    /// Consumer whose acks never reach the broker.
    struct AckFails(InMemoryConsumer);

    impl WorkConsumer for AckFails {
        fn receive(&mut self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError> {
            self.0.receive(timeout)
        }
        fn ack(&mut self, _delivery_tag: &str) -> Result<(), QueueError> {
            Err(QueueError::Unavailable("connection reset".to_string()))
        }
        fn release(&mut self, delivery_tag: &str) -> Result<(), QueueError> {
            self.0.release(delivery_tag)
        }
    }

    #[test]
    fn failed_ack_redelivers_and_the_rerun_is_skipped() {
        let f = Fixture::new();
        let id = f.submit("localhost");
        let mut worker = Worker::new(
            "flaky-acks",
            AckFails(f.queue.consumer()),
            f.store.clone(),
            f.artifacts.clone(),
            Arc::new(xml),
        );

        assert!(matches!(worker.process_next(WAIT), Err(QueueError::Unavailable(_))));
        assert_eq!(f.status(id), JobStatus::Completed);
        assert_eq!(f.queue.unacked_len(), 1);

        // The broker connection is gone; the delivery returns to the queue.
        drop(worker);
        assert_eq!(f.queue.ready_len(), 1);

        let mut worker = f.worker(xml);
        assert_eq!(
            worker.process_next(WAIT).unwrap(),
            Processed::Skipped {
                id,
                reason: SkipReason::Finished(JobStatus::Completed)
            }
        );
        assert_eq!(f.artifacts.get(id).unwrap(), b"<nmaprun/>");
    }

    #[test]
    fn spawned_worker_drains_queue_and_stops() {
        let f = Fixture::new();
        let ids: Vec<JobId> = (0..3).map(|i| f.submit(&format!("host{i}"))).collect();

        let handle = f
            .worker(xml)
            .spawn(WorkerConfig {
                poll_interval: Duration::from_millis(20),
                ..WorkerConfig::default()
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().completed < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.stats().completed, 3);
        handle.shutdown();

        for id in ids {
            assert_eq!(f.status(id), JobStatus::Completed);
        }
    }
}
