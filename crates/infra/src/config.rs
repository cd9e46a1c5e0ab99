//! Process configuration shared by the API server and the worker.
//!
//! Every option can be given as a flag or through the environment; binaries
//! `#[command(flatten)]` this struct into their own CLI.

use std::path::PathBuf;
use std::time::Duration;

use scanqueue_core::DEFAULT_MAX_ARG_LENGTH;

use crate::executor::DEFAULT_SCAN_IMAGE;
use crate::queue::DEFAULT_QUEUE_NAME;

#[derive(Debug, Clone, clap::Args)]
pub struct Settings {
    /// Status store host
    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    pub redis_host: String,

    /// Status store port
    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    /// Queue broker host (defaults to the status store host)
    #[arg(long, env = "BROKER_HOST")]
    pub broker_host: Option<String>,

    /// Queue broker port
    #[arg(long, env = "BROKER_PORT", default_value_t = 6379)]
    pub broker_port: u16,

    /// Directory holding job artifacts
    #[arg(long, env = "FILES_FOLDER", default_value = "files")]
    pub files_folder: PathBuf,

    /// Longest accepted job argument string, in characters
    #[arg(long, env = "MAX_ARG_LENGTH", default_value_t = DEFAULT_MAX_ARG_LENGTH)]
    pub max_arg_length: usize,

    /// Durable queue name
    #[arg(long, env = "QUEUE_NAME", default_value = DEFAULT_QUEUE_NAME)]
    pub queue_name: String,

    /// Consumer name for this worker (defaults to a random one)
    #[arg(long, env = "WORKER_NAME")]
    pub worker_name: Option<String>,

    /// Container image the executor runs
    #[arg(long, env = "SCAN_IMAGE", default_value = DEFAULT_SCAN_IMAGE)]
    pub scan_image: String,

    /// Wall-clock limit for one scan
    #[arg(long, env = "SCAN_TIMEOUT_SECS", default_value_t = 600)]
    pub scan_timeout_secs: u64,

    /// How long a delivery may stay unacknowledged before another worker claims it
    #[arg(long, env = "VISIBILITY_TIMEOUT_SECS", default_value_t = 900)]
    pub visibility_timeout_secs: u64,

    /// Use in-process store and queue instead of Redis
    #[arg(long, env = "USE_IN_MEMORY")]
    pub use_in_memory: bool,
}

impl Settings {
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }

    pub fn broker_url(&self) -> String {
        let host = self.broker_host.as_deref().unwrap_or(&self.redis_host);
        format!("redis://{}:{}/", host, self.broker_port)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    /// Configured worker name, or `worker-<random>`.
    pub fn worker_name(&self) -> String {
        self.worker_name
            .clone()
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4().simple()))
    }
}
