//! A Job is an identified piece of work bound to one or more schedules.

use std::{fmt, sync::Arc};

use jiff::{ToSpan as _, Zoned};

use crate::{
    error::{Error, Result},
    runner::Runnable,
    schedule::Schedule,
};

/// An identified action plus the schedules that fire it.
///
/// The scheduler owns its jobs outright; `next_run` and `last_run` are
/// written only by the scheduler loop. A job whose schedules are all
/// exhausted keeps `next_run = None` and stays registered but inert.
pub struct Job {
    id: String,
    runner: Arc<dyn Runnable>,
    schedules: Vec<Schedule>,
    next_run: Option<Zoned>,
    last_run: Option<Zoned>,
}

impl Job {
    /// Create a job from a non-empty id and a non-empty schedule list.
    pub fn new(
        id: impl Into<String>,
        runner: Arc<dyn Runnable>,
        schedules: Vec<Schedule>,
    ) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::EmptyJobId);
        }
        if schedules.is_empty() {
            return Err(Error::NoSchedules(id));
        }
        Ok(Self {
            id,
            runner,
            schedules,
            next_run: None,
            last_run: None,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn runner(&self) -> Arc<dyn Runnable> {
        Arc::clone(&self.runner)
    }

    #[must_use]
    pub fn next_run(&self) -> Option<&Zoned> {
        self.next_run.as_ref()
    }

    #[must_use]
    pub fn last_run(&self) -> Option<&Zoned> {
        self.last_run.as_ref()
    }

    /// The earliest firing instant across this job's schedules, ties
    /// resolved in favor of the first schedule in declaration order.
    /// Schedules with no future firing are skipped; the job only errors
    /// when every schedule is exhausted.
    pub fn next(&self, after: &Zoned) -> Result<Zoned> {
        let mut earliest: Option<Zoned> = None;
        for schedule in &self.schedules {
            // Expired schedule, skip.
            let Ok(next) = schedule.next(after) else {
                continue;
            };
            if earliest.as_ref().map_or(true, |found| next < *found) {
                earliest = Some(next);
            }
        }
        earliest.ok_or(Error::NoFutureFiring)
    }

    /// Recompute `next_run` from one second past `base`; the advance
    /// prevents an immediate re-fire on the instant just matched. On
    /// failure the job goes inert.
    pub(crate) fn set_next_run(&mut self, base: &Zoned) -> Result<()> {
        let advanced = base.checked_add(1.second())?;
        match self.next(&advanced) {
            Ok(next) => {
                self.next_run = Some(next);
                Ok(())
            }
            Err(e) => {
                self.next_run = None;
                Err(e)
            }
        }
    }

    pub(crate) fn set_last_run(&mut self, at: &Zoned) {
        self.last_run = Some(at.clone());
    }

    /// Value copy of this job's observable state.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            next_run: self.next_run.clone(),
            last_run: self.last_run.clone(),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("runner", &self.runner.name())
            .field("schedules", &self.schedules.len())
            .field("next_run", &self.next_run)
            .field("last_run", &self.last_run)
            .finish()
    }
}

/// Value copy of a job's observable state, handed to status and metrics
/// readers instead of a live reference.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: String,
    pub next_run: Option<Zoned>,
    pub last_run: Option<Zoned>,
}

impl fmt::Display for JobSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "id: {}", self.id)?;
        match &self.next_run {
            Some(at) => writeln!(f, "next run: {at}")?,
            None => writeln!(f, "next run: never")?,
        }
        match &self.last_run {
            Some(at) => write!(f, "last run: {at}"),
            None => write!(f, "last run: never"),
        }
    }
}
