//! Backend wiring: status store, queue, artifacts and the services on top.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use scanqueue_infra::Settings;
use scanqueue_infra::artifacts::{ArtifactStore, FsArtifactStore};
use scanqueue_infra::executor::{CommandExecutor, ScanExecutor};
use scanqueue_infra::jobs::{JobService, SubmissionService, Worker, WorkerConfig, WorkerHandle};
use scanqueue_infra::queue::{InMemoryWorkQueue, RedisStreamsQueue, WorkQueue};
use scanqueue_infra::retry::RetryPolicy;
use scanqueue_infra::status_store::{InMemoryStatusStore, RedisStatusStore, StatusStore};

use super::registry::ConnectionRegistry;

/// Everything the HTTP handlers need.
#[derive(Clone)]
pub struct AppServices {
    pub submissions: SubmissionService,
    pub jobs: JobService,
    pub store: Arc<dyn StatusStore>,
    pub registry: ConnectionRegistry,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn StatusStore>,
        queue: Arc<dyn WorkQueue>,
        artifacts: Arc<dyn ArtifactStore>,
        max_arg_length: usize,
    ) -> Self {
        Self {
            submissions: SubmissionService::new(store.clone(), queue).with_max_arg_length(max_arg_length),
            jobs: JobService::new(store.clone(), artifacts),
            store,
            registry: ConnectionRegistry::new(),
        }
    }
}

/// Running backends: the services plus an embedded worker, if any.
pub struct Runtime {
    pub services: Arc<AppServices>,
    worker: Option<WorkerHandle>,
}

impl Runtime {
    /// Stop the embedded worker (after its current job).
    pub async fn stop(self) {
        if let Some(worker) = self.worker {
            let _ = tokio::task::spawn_blocking(move || worker.shutdown()).await;
        }
    }
}

/// Build backends from settings: Redis, or everything in-process.
pub async fn start(settings: &Settings) -> anyhow::Result<Runtime> {
    if settings.use_in_memory {
        warn!("using in-memory store and queue; state is lost on exit");
        let executor: Arc<dyn ScanExecutor> = Arc::new(CommandExecutor::docker(
            &settings.scan_image,
            settings.scan_timeout(),
            tokio::runtime::Handle::current(),
        ));
        return in_memory(&settings.files_folder, settings.max_arg_length, Some(executor));
    }

    let artifacts = open_artifacts(&settings.files_folder)?;
    let store: Arc<dyn StatusStore> =
        Arc::new(RedisStatusStore::new(settings.redis_url()).context("invalid status store address")?);
    wait_for_store(store.clone()).await;

    let queue = RedisStreamsQueue::new(settings.broker_url(), &settings.queue_name)
        .context("invalid broker address")?;
    let declare = queue.clone();
    match tokio::task::spawn_blocking(move || declare.declare()).await? {
        Ok(()) => info!(queue = %settings.queue_name, "queue declared"),
        // Enqueue declares again on first use.
        Err(e) => warn!(queue = %settings.queue_name, error = %e, "queue declare failed"),
    }

    let services = AppServices::new(store, Arc::new(queue), artifacts, settings.max_arg_length);
    Ok(Runtime {
        services: Arc::new(services),
        worker: None,
    })
}

/// In-process store and queue. With an executor, an embedded worker consumes
/// the queue; without one, jobs stay `Queued` until updated by hand.
pub fn in_memory(
    files_folder: &Path,
    max_arg_length: usize,
    executor: Option<Arc<dyn ScanExecutor>>,
) -> anyhow::Result<Runtime> {
    let artifacts = open_artifacts(files_folder)?;
    let store = InMemoryStatusStore::arc();
    let queue = InMemoryWorkQueue::new();

    let worker = match executor {
        Some(executor) => {
            let worker = Worker::new(
                "embedded-worker",
                queue.consumer(),
                store.clone(),
                artifacts.clone(),
                executor,
            );
            Some(worker.spawn(WorkerConfig::default()).context("failed to start embedded worker")?)
        }
        None => None,
    };

    let services = AppServices::new(store, Arc::new(queue), artifacts, max_arg_length);
    Ok(Runtime {
        services: Arc::new(services),
        worker,
    })
}

fn open_artifacts(dir: &Path) -> anyhow::Result<Arc<dyn ArtifactStore>> {
    let artifacts = FsArtifactStore::new(dir);
    artifacts
        .ensure_dir()
        .with_context(|| format!("cannot create artifact directory {}", dir.display()))?;
    Ok(Arc::new(artifacts))
}

/// Block until the status store answers a ping, backing off between tries.
pub async fn wait_for_store(store: Arc<dyn StatusStore>) {
    let policy = RetryPolicy::forever(Duration::from_millis(250), Duration::from_secs(10));
    let mut attempt = 0u32;
    loop {
        let pinged = store.clone();
        match tokio::task::spawn_blocking(move || pinged.ping()).await {
            Ok(Ok(())) => {
                info!("status store reachable");
                return;
            }
            Ok(Err(e)) => {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "status store not reachable yet");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(error = %e, "store ping task failed");
                tokio::time::sleep(policy.base_delay).await;
            }
        }
    }
}
