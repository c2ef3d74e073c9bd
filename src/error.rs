//! This module defines the error type and Result alias.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A schedule field token that is not `*`, a range, a step, or an integer.
    #[error("unsupported schedule field token `{0}`")]
    UnsupportedToken(String),
    #[error("range `{0}` has its start after its end")]
    InvertedRange(String),
    #[error("step in `{0}` must be at least 1")]
    BadStep(String),
    #[error("step start {start} is above the field maximum {max}")]
    StepStartAboveMax { start: i64, max: i64 },
    #[error("value {value} is below the field minimum {min}")]
    BelowMinimum { value: i64, min: i64 },
    #[error("value {value} is above the field maximum {max}")]
    AboveMaximum { value: i64, max: i64 },
    #[error("schedule field `{0}` must be specified")]
    MissingField(&'static str),
    #[error("unknown timezone `{0}`")]
    UnknownTimeZone(String),
    /// No matching instant exists within the ten-year lookup horizon.
    #[error("no future firing time found")]
    NoFutureFiring,
    #[error("job `{0}` already exists")]
    DuplicateJob(String),
    #[error("job `{0}` does not exist")]
    UnknownJob(String),
    #[error("job id must not be empty")]
    EmptyJobId,
    #[error("job `{0}` has no schedules")]
    NoSchedules(String),
    #[error("job `{id}` is not schedulable: {source}")]
    NotSchedulable {
        id: String,
        #[source]
        source: Box<Error>,
    },
    #[error("job command must have at least one element")]
    EmptyCommand,
    #[error("invalid timeout `{input}`: {source}")]
    BadTimeout {
        input: String,
        #[source]
        source: humantime::DurationError,
    },
    /// The scheduler task has terminated and no longer accepts commands.
    #[error("scheduler is unavailable")]
    SchedulerGone,
    #[error("no jobs are defined in the configuration")]
    NoJobs,
    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error(transparent)]
    Time(#[from] jiff::Error),
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
