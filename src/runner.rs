//! The actions a job can fire must implement the `Runnable` trait; the
//! stock implementation supervises one subprocess per invocation.

use std::{
    fmt, fs,
    path::PathBuf,
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{process::Command, sync::Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;

/// A job action. Each invocation runs on its own background task so the
/// scheduler loop never blocks on it.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Execute one invocation to completion.
    async fn run(&self);
    /// Short name for logs and debug output.
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn Runnable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Runnable(name={})", self.name())
    }
}

/// Terminal state of one runner invocation, as reported to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
    Skipped,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Supervises one subprocess invocation: opens capture files, enforces
/// the non-reentrancy guard, applies the per-job timeout, and observes
/// the global cancel signal. The job's configuration is captured
/// immutably at construction; the runner never touches the job record.
pub struct CommandRunner {
    id: String,
    command: Vec<String>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    timeout: Option<Duration>,
    /// One-permit gate, present only when parallel runs are disabled.
    gate: Option<Semaphore>,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
}

impl CommandRunner {
    pub fn new(
        id: impl Into<String>,
        command: Vec<String>,
        stdout: Option<PathBuf>,
        stderr: Option<PathBuf>,
        parallel: bool,
        timeout: Option<Duration>,
        cancel: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> crate::Result<Self> {
        if command.is_empty() {
            return Err(crate::Error::EmptyCommand);
        }
        Ok(Self {
            id: id.into(),
            command,
            stdout,
            stderr,
            timeout,
            gate: (!parallel).then(|| Semaphore::new(1)),
            cancel,
            metrics,
        })
    }

    async fn execute(&self) -> RunStatus {
        let stdout = match self.open_sink(&self.stdout) {
            Ok(file) => file,
            Err(e) => {
                error!("{}: failure opening stdout file for writing: {e}", self.id);
                return RunStatus::Skipped;
            }
        };
        let stderr = match self.open_sink(&self.stderr) {
            Ok(file) => file,
            Err(e) => {
                error!("{}: failure opening stderr file for writing: {e}", self.id);
                return RunStatus::Skipped;
            }
        };
        // When the gate exists this job must not overlap itself; a held
        // permit means a previous invocation is still going.
        let _permit = match &self.gate {
            Some(gate) => match gate.try_acquire() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(
                        "job {} is already running and its parallel run is disabled, skipped execution",
                        self.id
                    );
                    return RunStatus::Skipped;
                }
            },
            None => None,
        };

        debug!("starting {} command: {:?}", self.id, self.command);
        let mut child = Command::new(&self.command[0]);
        child.args(&self.command[1..]).stdin(Stdio::null());
        if let Some(file) = stdout {
            child.stdout(Stdio::from(file));
        }
        if let Some(file) = stderr {
            child.stderr(Stdio::from(file));
        }
        child.kill_on_drop(true);
        let mut child = match child.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("{}: command start failed: {e}", self.id);
                return RunStatus::Failed;
            }
        };

        debug!("{}: waiting for process to finish", self.id);
        tokio::select! {
            exit = child.wait() => match exit {
                Ok(status) if status.success() => {
                    info!("{}: job finished successfully", self.id);
                    RunStatus::Success
                }
                Ok(status) => {
                    error!("{}: job failed with exit status {status}", self.id);
                    RunStatus::Failed
                }
                Err(e) => {
                    error!("{}: wait on process failed: {e}", self.id);
                    RunStatus::Failed
                }
            },
            () = timeout_elapsed(self.timeout) => {
                self.kill(&mut child, "job reached its timeout").await;
                RunStatus::Failed
            }
            () = self.cancel.cancelled() => {
                debug!("job {} received the global shutdown signal, terminating", self.id);
                self.kill(&mut child, "global shutdown signal received").await;
                RunStatus::Failed
            }
        }
    }

    fn open_sink(&self, path: &Option<PathBuf>) -> std::io::Result<Option<fs::File>> {
        match path {
            Some(path) => fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(Some),
            None => Ok(None),
        }
    }

    async fn kill(&self, child: &mut tokio::process::Child, reason: &str) {
        match child.kill().await {
            Ok(()) => error!("{}: {reason}, process was killed", self.id),
            Err(e) => error!("{}: {reason}, but failed to kill process: {e}", self.id),
        }
    }
}

#[async_trait]
impl Runnable for CommandRunner {
    async fn run(&self) {
        self.metrics.jobs_running.inc();
        let status = self.execute().await;
        self.metrics.jobs_running.dec();
        self.metrics
            .jobs_finished
            .with_label_values(&[self.id.as_str(), status.as_str()])
            .inc();
    }

    fn name(&self) -> &str {
        &self.id
    }
}

/// Pending forever when no timeout is configured.
async fn timeout_elapsed(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new().unwrap())
    }

    fn finished(metrics: &Metrics, id: &str, status: RunStatus) -> u64 {
        metrics
            .jobs_finished
            .with_label_values(&[id, status.as_str()])
            .get()
    }

    #[tokio::test]
    async fn clean_exit_appends_stdout_and_counts_success() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.log");
        let metrics = metrics();
        let runner = CommandRunner::new(
            "echoer",
            vec!["echo".into(), "chime".into()],
            Some(out.clone()),
            None,
            true,
            None,
            CancellationToken::new(),
            Arc::clone(&metrics),
        )
        .unwrap();
        runner.run().await;
        runner.run().await;
        let mut captured = String::new();
        fs::File::open(&out)
            .unwrap()
            .read_to_string(&mut captured)
            .unwrap();
        assert_eq!(captured, "chime\nchime\n");
        assert_eq!(finished(&metrics, "echoer", RunStatus::Success), 2);
        assert_eq!(metrics.jobs_running.get(), 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let metrics = metrics();
        let runner = CommandRunner::new(
            "liar",
            vec!["false".into()],
            None,
            None,
            true,
            None,
            CancellationToken::new(),
            Arc::clone(&metrics),
        )
        .unwrap();
        runner.run().await;
        assert_eq!(finished(&metrics, "liar", RunStatus::Failed), 1);
    }

    #[tokio::test]
    async fn unstartable_command_is_a_failure() {
        let metrics = metrics();
        let runner = CommandRunner::new(
            "ghost",
            vec!["/nonexistent/belfry-test-binary".into()],
            None,
            None,
            true,
            None,
            CancellationToken::new(),
            Arc::clone(&metrics),
        )
        .unwrap();
        runner.run().await;
        assert_eq!(finished(&metrics, "ghost", RunStatus::Failed), 1);
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let metrics = metrics();
        let runner = CommandRunner::new(
            "sleeper",
            vec!["sleep".into(), "30".into()],
            None,
            None,
            true,
            Some(Duration::from_millis(100)),
            CancellationToken::new(),
            Arc::clone(&metrics),
        )
        .unwrap();
        let started = std::time::Instant::now();
        runner.run().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(finished(&metrics, "sleeper", RunStatus::Failed), 1);
    }

    #[tokio::test]
    async fn global_cancel_kills_the_process() {
        let metrics = metrics();
        let cancel = CancellationToken::new();
        let runner = Arc::new(
            CommandRunner::new(
                "cancelled",
                vec!["sleep".into(), "30".into()],
                None,
                None,
                true,
                None,
                cancel.clone(),
                Arc::clone(&metrics),
            )
            .unwrap(),
        );
        let task = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(finished(&metrics, "cancelled", RunStatus::Failed), 1);
    }

    #[tokio::test]
    async fn overlapping_runs_are_skipped_when_not_parallel() {
        let metrics = metrics();
        let runner = Arc::new(
            CommandRunner::new(
                "serial",
                vec!["sleep".into(), "2".into()],
                None,
                None,
                false,
                None,
                CancellationToken::new(),
                Arc::clone(&metrics),
            )
            .unwrap(),
        );
        let long = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        // Second invocation arrives while the first still holds the gate.
        runner.run().await;
        assert_eq!(finished(&metrics, "serial", RunStatus::Skipped), 1);
        long.await.unwrap();
        assert_eq!(finished(&metrics, "serial", RunStatus::Success), 1);
    }
}
