//! The scheduler is responsible for managing all scheduled jobs.
//!
//! It runs as a single actor task that exclusively owns the job set.
//! While serving, every mutation and read arrives through a command
//! mailbox and is applied on the loop, so the set is only ever touched
//! from one task; callers get their answer back on a oneshot channel.
//! Fired runners are spawned onto a task tracker that doubles as the
//! drain counter for `stop`.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use jiff::{ToSpan as _, Zoned};
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Error, Result},
    job::{Job, JobSnapshot},
    metrics::Metrics,
};

/// Mailbox depth for mutation commands.
const MAILBOX: usize = 32;

enum Command {
    Add(Job, oneshot::Sender<Result<()>>),
    Remove(String, oneshot::Sender<Result<()>>),
    List(oneshot::Sender<Vec<JobSnapshot>>),
}

/// A Scheduler tracks registered jobs and fires the ones that come due.
///
/// Construct it, register the initial jobs directly, then hand it to a
/// task via [`Scheduler::run`] and talk to it through its
/// [`SchedulerHandle`].
pub struct Scheduler {
    jobs: Vec<Job>,
    metrics: Arc<Metrics>,
    running: Arc<AtomicBool>,
    tracker: TaskTracker,
    cmd_rx: mpsc::Receiver<Command>,
    start_rx: mpsc::Receiver<()>,
    stop_rx: mpsc::Receiver<()>,
}

impl Scheduler {
    /// Build a scheduler and the handle that will drive it. The sending
    /// ends of the control channels live only in handles, so the actor
    /// exits once the last handle is gone.
    #[must_use]
    pub fn new(metrics: Arc<Metrics>) -> (Self, SchedulerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(MAILBOX);
        let (start_tx, start_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let running = Arc::new(AtomicBool::new(false));
        let tracker = TaskTracker::new();
        let scheduler = Self {
            jobs: Vec::new(),
            metrics,
            running: Arc::clone(&running),
            tracker: tracker.clone(),
            cmd_rx,
            start_rx,
            stop_rx,
        };
        let handle = SchedulerHandle {
            cmd_tx,
            start_tx,
            stop_tx,
            running,
            tracker,
        };
        (scheduler, handle)
    }

    /// Add a job directly. Only valid before the scheduler task is
    /// spawned; afterwards use [`SchedulerHandle::add_job`].
    pub fn add_job(&mut self, job: Job) -> Result<()> {
        self.attach(job)
    }

    /// Remove a job directly by id.
    pub fn remove_job(&mut self, id: &str) -> Result<()> {
        self.delete(id)
    }

    /// Value copies of every registered job, in insertion order.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.jobs.iter().map(Job::snapshot).collect()
    }

    /// Consume the scheduler and serve until every handle is dropped.
    /// The loop alternates between a parked state waiting for a start
    /// signal and the serving state that fires jobs.
    pub async fn run(mut self) {
        while self.parked().await {
            self.serve().await;
        }
        debug!("scheduler task exited");
    }

    /// Wait for a start signal, applying mutations in the meantime.
    /// Returns false when every handle is gone.
    async fn parked(&mut self) -> bool {
        loop {
            tokio::select! {
                signal = self.start_rx.recv() => match signal {
                    Some(()) => return true,
                    None => return false,
                },
                command = self.cmd_rx.recv() => match command {
                    Some(command) => self.apply(command, false),
                    None => return false,
                },
                // A stop while already stopped has nothing to do.
                _ = self.stop_rx.recv() => {}
            }
        }
    }

    /// The main cycle: sleep until the nearest `next_run`, fire whatever
    /// is due, and drain commands and stop signals in between.
    async fn serve(&mut self) {
        info!("started scheduler");
        self.running.store(true, Ordering::SeqCst);
        let mut now = Zoned::now();
        for job in &mut self.jobs {
            if let Err(e) = job.set_next_run(&now) {
                warn!("job {} will not be scheduled due to error: {e}", job.id());
            }
        }
        loop {
            let wake_up = self.wake_up_time(&now);
            debug!("next wake up at {wake_up}");
            let timer = tokio::time::sleep(sleep_span(&now, &wake_up));
            tokio::pin!(timer);
            tokio::select! {
                () = &mut timer => {
                    now = Zoned::now();
                    self.fire_due(&now);
                }
                _ = self.stop_rx.recv() => {
                    self.running.store(false, Ordering::SeqCst);
                    info!("scheduler stopped");
                    return;
                }
                command = self.cmd_rx.recv() => match command {
                    Some(command) => {
                        self.apply(command, true);
                        now = Zoned::now();
                    }
                    None => {
                        self.running.store(false, Ordering::SeqCst);
                        return;
                    }
                },
                Some(()) = self.start_rx.recv() => {
                    error!("scheduler is already running, not starting new");
                }
            }
        }
    }

    /// Launch every job whose `next_run` has arrived, in insertion
    /// order, and reschedule each one from `now`.
    fn fire_due(&mut self, now: &Zoned) {
        debug!("scheduler woke up");
        for job in &mut self.jobs {
            let due = match job.next_run() {
                Some(next_run) if *next_run <= *now => next_run.clone(),
                _ => continue,
            };
            job.set_last_run(now);
            info!(
                "starting job {}, scheduled at: {due}, current time: {now}",
                job.id()
            );
            let runner = job.runner();
            self.tracker.spawn(async move { runner.run().await });
            match job.set_next_run(now) {
                Ok(()) => {
                    if let Some(next_run) = job.next_run() {
                        info!("job {} next run scheduled at: {next_run}", job.id());
                    }
                }
                Err(e) => warn!(
                    "job {} will not be scheduled further due to scheduling error: {e}",
                    job.id()
                ),
            }
        }
    }

    /// The earliest `next_run` strictly after `now`. With nothing to
    /// schedule the loop still needs a timer, so it sleeps a decade and
    /// relies on commands to interrupt earlier.
    fn wake_up_time(&self, now: &Zoned) -> Zoned {
        let mut wake_up: Option<&Zoned> = None;
        for job in &self.jobs {
            if let Some(next_run) = job.next_run() {
                if next_run > now && wake_up.map_or(true, |found| next_run < found) {
                    wake_up = Some(next_run);
                }
            }
        }
        match wake_up {
            Some(wake_up) => wake_up.clone(),
            None => {
                warn!("no schedulable jobs, sleeping for the maximum window");
                now.saturating_add(10.years())
            }
        }
    }

    fn apply(&mut self, command: Command, running: bool) {
        match command {
            Command::Add(job, reply) => {
                let _ = reply.send(self.insert(job, running));
            }
            Command::Remove(id, reply) => {
                let _ = reply.send(self.delete(&id));
            }
            Command::List(reply) => {
                let _ = reply.send(self.jobs());
            }
        }
    }

    /// While serving, an incoming job must prove it has a future firing
    /// before it may join the set.
    fn insert(&mut self, mut job: Job, recompute: bool) -> Result<()> {
        if recompute {
            let now = Zoned::now();
            if let Err(e) = job.set_next_run(&now) {
                return Err(Error::NotSchedulable {
                    id: job.id().to_string(),
                    source: Box::new(e),
                });
            }
        }
        self.attach(job)
    }

    fn attach(&mut self, job: Job) -> Result<()> {
        if self.jobs.iter().any(|existing| existing.id() == job.id()) {
            return Err(Error::DuplicateJob(job.id().to_string()));
        }
        self.jobs.push(job);
        self.metrics.jobs_registered.set(self.jobs.len() as i64);
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.id() != id);
        if self.jobs.len() == before {
            return Err(Error::UnknownJob(id.to_string()));
        }
        self.metrics.jobs_registered.set(self.jobs.len() as i64);
        Ok(())
    }
}

/// Time to sleep between two instants, clamped at zero.
fn sleep_span(now: &Zoned, wake_up: &Zoned) -> Duration {
    let millis = wake_up.timestamp().as_millisecond() - now.timestamp().as_millisecond();
    Duration::from_millis(millis.max(0) as u64)
}

/// Cheap cloneable front to a running [`Scheduler`] task. All methods
/// hop through the command mailbox, so concurrent callers see a
/// consistent job set.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::Sender<Command>,
    start_tx: mpsc::Sender<()>,
    stop_tx: mpsc::Sender<()>,
    running: Arc<AtomicBool>,
    tracker: TaskTracker,
}

impl SchedulerHandle {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the scheduler to begin serving. Asynchronous: the loop picks
    /// the signal up on its next turn.
    pub fn start(&self) {
        self.tracker.reopen();
        let _ = self.start_tx.try_send(());
    }

    /// Post the stop signal if the scheduler is serving and return a
    /// handle that resolves once every in-flight runner has finished.
    /// The scheduler never kills runners itself; callers decide how
    /// long to wait.
    #[must_use]
    pub fn stop(&self) -> DrainHandle {
        if self.is_running() {
            let _ = self.stop_tx.try_send(());
        }
        self.tracker.close();
        DrainHandle {
            tracker: self.tracker.clone(),
        }
    }

    /// Register a job, failing on a duplicate id or, while serving, on a
    /// job with no future firing.
    pub async fn add_job(&self, job: Job) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Add(job, reply_tx))
            .await
            .map_err(|_| Error::SchedulerGone)?;
        reply_rx.await.map_err(|_| Error::SchedulerGone)?
    }

    /// Remove a job by id.
    pub async fn remove_job(&self, id: &str) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Remove(id.to_string(), reply_tx))
            .await
            .map_err(|_| Error::SchedulerGone)?;
        reply_rx.await.map_err(|_| Error::SchedulerGone)?
    }

    /// Snapshot of every registered job, in insertion order.
    pub async fn jobs(&self) -> Result<Vec<JobSnapshot>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::List(reply_tx))
            .await
            .map_err(|_| Error::SchedulerGone)?;
        reply_rx.await.map_err(|_| Error::SchedulerGone)
    }
}

/// Awaitable drain of in-flight runners after a stop.
#[derive(Debug)]
pub struct DrainHandle {
    tracker: TaskTracker,
}

impl DrainHandle {
    /// Resolve once every outstanding runner has completed.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    /// Drain with a deadline; true when everything finished in time.
    pub async fn wait_for(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.tracker.wait())
            .await
            .is_ok()
    }
}
