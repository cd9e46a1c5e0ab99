//! Sandboxed scan executor.
//!
//! The executor runs the external scanning tool for one job and returns its
//! raw output. The default adapter shells out to `docker run --rm <image>`
//! so the tool runs in a throwaway container; the job arguments are passed as
//! separate argv entries, never through a shell.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Default container image for scans.
pub const DEFAULT_SCAN_IMAGE: &str = "instrumentisto/nmap";

/// Default wall-clock limit for one execution.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("scan exited with {}: {stderr}", exit_label(.code))]
    Exited { code: Option<i32>, stderr: String },
    #[error("scan timed out after {0:?}")]
    TimedOut(Duration),
    #[error("executor I/O error: {0}")]
    Io(#[from] io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

/// Runs one scan to completion and returns its raw output.
pub trait ScanExecutor: Send + Sync {
    fn execute(&self, arguments: &str) -> Result<Vec<u8>, ExecutorError>;
}

impl<F> ScanExecutor for F
where
    F: Fn(&str) -> Result<Vec<u8>, ExecutorError> + Send + Sync,
{
    fn execute(&self, arguments: &str) -> Result<Vec<u8>, ExecutorError> {
        self(arguments)
    }
}

/// Subprocess executor: `<program> <base_args...> <arguments split on whitespace>`.
///
/// The child runs on the given Tokio runtime; `execute` blocks the calling
/// (worker) thread until it finishes, so it must not be called from inside
/// that runtime's async tasks.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
    runtime: Handle,
}

impl CommandExecutor {
    pub fn new(
        program: impl Into<String>,
        base_args: impl IntoIterator<Item = impl Into<String>>,
        timeout: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            program: program.into(),
            base_args: base_args.into_iter().map(Into::into).collect(),
            timeout,
            runtime,
        }
    }

    /// `docker run --rm <image> -oX - <arguments...>`: XML report on stdout.
    pub fn docker(image: impl Into<String>, timeout: Duration, runtime: Handle) -> Self {
        let args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--security-opt=no-new-privileges".to_string(),
            image.into(),
            "-oX".to_string(),
            "-".to_string(),
        ];
        Self::new("docker", args, timeout, runtime)
    }
}

impl CommandExecutor {
    async fn run(&self, arguments: &str) -> Result<Vec<u8>, ExecutorError> {
        let child = Command::new(&self.program)
            .args(&self.base_args)
            .args(arguments.split_whitespace())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        debug!(program = %self.program, pid = ?child.id(), "executor started");

        // On timeout the child future is dropped, which kills the process.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(program = %self.program, timeout = ?self.timeout, "executor timed out, killed");
                return Err(ExecutorError::TimedOut(self.timeout));
            }
        };

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(ExecutorError::Exited {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl ScanExecutor for CommandExecutor {
    fn execute(&self, arguments: &str) -> Result<Vec<u8>, ExecutorError> {
        self.runtime.block_on(self.run(arguments))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use std::time::Instant;

    const SHORT: Duration = Duration::from_secs(10);

    /// Executors block their caller, so tests drive them from a plain thread
    /// against a separate multi-thread runtime.
    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn captures_stdout_and_splits_arguments() {
        let rt = runtime();
        let exec = CommandExecutor::new("echo", ["-n"], SHORT, rt.handle().clone());
        let out = exec.execute("  hello   world ").unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn nonzero_exit_is_an_error() {
        let rt = runtime();
        let exec = CommandExecutor::new("sh", ["-c", "echo boom >&2; exit 3"], SHORT, rt.handle().clone());
        let err = exec.execute("").unwrap_err();
        match err {
            ExecutorError::Exited { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let rt = runtime();
        let exec = CommandExecutor::new("scanqueue-no-such-binary", Vec::<String>::new(), SHORT, rt.handle().clone());
        assert!(matches!(exec.execute("x"), Err(ExecutorError::Spawn { .. })));
    }

    #[test]
    fn slow_scan_is_killed_at_timeout() {
        let rt = runtime();
        let exec = CommandExecutor::new("sleep", Vec::<String>::new(), Duration::from_millis(100), rt.handle().clone());
        let started = Instant::now();
        let err = exec.execute("5").unwrap_err();
        assert!(matches!(err, ExecutorError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn docker_command_line() {
        let rt = runtime();
        let exec = CommandExecutor::docker("img", SHORT, rt.handle().clone());
        assert_eq!(exec.program, "docker");
        assert_eq!(
            exec.base_args,
            ["run", "--rm", "--security-opt=no-new-privileges", "img", "-oX", "-"]
        );
    }

    #[test]
    fn closures_are_executors() {
        let exec = |args: &str| -> Result<Vec<u8>, ExecutorError> { Ok(args.as_bytes().to_vec()) };
        assert_eq!(ScanExecutor::execute(&exec, "abc").unwrap(), b"abc");
    }
}
