use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use scanqueue_api::app::services::wait_for_store;
use scanqueue_api::shutdown::install_shutdown_handler;
use scanqueue_infra::Settings;
use scanqueue_infra::artifacts::{ArtifactStore, FsArtifactStore};
use scanqueue_infra::executor::{CommandExecutor, ScanExecutor};
use scanqueue_infra::jobs::{Worker, WorkerConfig};
use scanqueue_infra::queue::{RedisStreamsQueue, WorkQueue};
use scanqueue_infra::status_store::{RedisStatusStore, StatusStore};

/// Scan worker: consumes the job queue and runs each scan.
#[derive(Debug, Parser)]
#[command(name = "scanqueue-worker", version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scanqueue_observability::init();
    let settings = Cli::parse().settings;
    if settings.use_in_memory {
        bail!("the standalone worker needs Redis; in-memory mode runs an embedded worker in scanqueue-api");
    }

    let shutdown = install_shutdown_handler().context("failed to install signal handlers")?;

    let artifacts = FsArtifactStore::new(&settings.files_folder);
    artifacts
        .ensure_dir()
        .with_context(|| format!("cannot create artifact directory {}", settings.files_folder.display()))?;
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(artifacts);

    let store: Arc<dyn StatusStore> =
        Arc::new(RedisStatusStore::new(settings.redis_url()).context("invalid status store address")?);
    wait_for_store(store.clone()).await;

    let queue = RedisStreamsQueue::new(settings.broker_url(), &settings.queue_name)
        .context("invalid broker address")?;
    let declare = queue.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || declare.declare()).await? {
        // The consumer declares again once the broker is back.
        tracing::warn!(queue = %settings.queue_name, error = %e, "queue declare failed");
    }
    let name = settings.worker_name();
    let consumer = queue
        .consumer(&name, settings.visibility_timeout())
        .context("failed to create queue consumer")?;

    let executor: Arc<dyn ScanExecutor> = Arc::new(CommandExecutor::docker(
        &settings.scan_image,
        settings.scan_timeout(),
        tokio::runtime::Handle::current(),
    ));
    let handle = Worker::new(name.clone(), consumer, store, artifacts, executor)
        .spawn(WorkerConfig::default())
        .context("failed to start worker thread")?;
    tracing::info!(worker = %name, queue = %settings.queue_name, image = %settings.scan_image, "worker started");

    shutdown.cancelled().await;
    let stats = handle.stats();
    tokio::task::spawn_blocking(move || handle.shutdown()).await?;
    tracing::info!(worker = %name, ?stats, "worker stopped");
    Ok(())
}
