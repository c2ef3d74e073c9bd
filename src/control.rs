//! The thin pause/resume/status/shutdown surface the management
//! interface drives. Every operation answers with human-readable text.

use std::{fmt::Write as _, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scheduler::SchedulerHandle;

/// Coordinates graceful drain and process exit on top of a
/// [`SchedulerHandle`]. One controller per process.
pub struct Controller {
    scheduler: SchedulerHandle,
    cancel: CancellationToken,
    /// How long `pause` waits for in-flight jobs before giving up on the
    /// drain. Expiry is reported, never escalated to a kill.
    stop_timeout: Duration,
    /// Grace period between the global cancel and process exit, so
    /// runners get to kill and reap their subprocesses.
    termination_timeout: Duration,
    exit_tx: mpsc::Sender<()>,
}

impl Controller {
    #[must_use]
    pub fn new(
        scheduler: SchedulerHandle,
        cancel: CancellationToken,
        stop_timeout: Duration,
        termination_timeout: Duration,
        exit_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            scheduler,
            cancel,
            stop_timeout,
            termination_timeout,
            exit_tx,
        }
    }

    /// Stop scheduling and wait for running jobs, bounded by the
    /// configured stop timeout. Jobs are left running on expiry.
    pub async fn pause(&self) -> String {
        let drain = self.scheduler.stop();
        if drain.wait_for(self.stop_timeout).await {
            "scheduler stopped".to_string()
        } else {
            format!(
                "scheduler stopped with exceeded timeout {}s, there were left running jobs",
                self.stop_timeout.as_secs()
            )
        }
    }

    /// Start scheduling again. Asynchronous, like the initial start.
    pub fn resume(&self) -> String {
        self.scheduler.start();
        "scheduler started".to_string()
    }

    /// Render the running flag and a block per registered job.
    pub async fn status(&self) -> String {
        let mut out = format!("running: {}\n", self.scheduler.is_running());
        match self.scheduler.jobs().await {
            Ok(jobs) => {
                for job in jobs {
                    let _ = write!(out, "\n{job}\n");
                }
            }
            Err(e) => {
                let _ = write!(out, "\njobs unavailable: {e}\n");
            }
        }
        out
    }

    /// Pause, broadcast the global cancel so every active runner kills
    /// its subprocess, then signal the main task to exit.
    pub async fn shutdown(&self) -> String {
        let mut out = self.pause().await;
        warn!("sending global shutdown signal to any running job");
        self.cancel.cancel();
        out.push_str("\nsent global cancel to any still running job\nterminating");
        debug!(
            "sleeping for {}s to allow jobs to be killed",
            self.termination_timeout.as_secs()
        );
        tokio::time::sleep(self.termination_timeout).await;
        info!("shutdown complete, signalling exit");
        let _ = self.exit_tx.send(()).await;
        out
    }
}
