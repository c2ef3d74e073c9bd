//! # belfry
//!
//! `belfry` is a single-host job scheduler that launches external
//! commands at calendar moments given by named time fields (year, month,
//! day, weekday, hour, minute, second) in a chosen timezone. A job
//! carries one or more schedules; the scheduler sleeps until the nearest
//! firing, runs due commands as supervised subprocesses, and exposes
//! pause/resume/status/shutdown over a small management interface.
//!
//! ```rust
//! use belfry::{Schedule, ScheduleSpec};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let nightly = Schedule::new(&ScheduleSpec {
//!     minute: "30".into(),
//!     hour: "2".into(),
//!     day: "*".into(),
//!     month: "*".into(),
//!     location: "UTC".into(),
//!     ..Default::default()
//! })?;
//! let after = jiff::civil::date(2024, 6, 1).at(12, 0, 0, 0).intz("UTC")?;
//! assert_eq!(
//!     nightly.next(&after)?,
//!     jiff::civil::date(2024, 6, 2).at(2, 30, 0, 0).intz("UTC")?
//! );
//! # Ok(())
//! # }
//! ```

mod config;
mod control;
mod error;
mod field;
mod job;
pub mod manage;
mod metrics;
mod runner;
mod schedule;
mod scheduler;

pub use crate::{
    config::{Config, JobConfig, LoggingConfig, ManagementConfig, MetricsConfig},
    control::Controller,
    error::{Error, Result},
    job::{Job, JobSnapshot},
    metrics::Metrics,
    runner::{CommandRunner, RunStatus, Runnable},
    schedule::{Schedule, ScheduleSpec},
    scheduler::{DrainHandle, Scheduler, SchedulerHandle},
};
