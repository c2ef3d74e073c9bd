//! Prometheus counters for scheduler and runner activity.

use prometheus::{Encoder as _, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::Result;

/// Shared metric handles backed by a per-process registry. Increments
/// are atomic; any holder may update from any task.
#[derive(Debug)]
pub struct Metrics {
    /// Jobs currently registered on the scheduler.
    pub jobs_registered: IntGauge,
    /// Runner invocations in flight.
    pub jobs_running: IntGauge,
    /// Finished invocations by job id and terminal status.
    pub jobs_finished: IntCounterVec,
    registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let jobs_registered = IntGauge::new(
            "belfry_jobs_registered",
            "Number of jobs registered in the scheduler for processing.",
        )?;
        let jobs_running = IntGauge::new(
            "belfry_jobs_running",
            "Number of job invocations in progress.",
        )?;
        let jobs_finished = IntCounterVec::new(
            Opts::new(
                "belfry_jobs_finished",
                "Total finished job invocations by job id and status.",
            ),
            &["job", "status"],
        )?;
        let registry = Registry::new();
        registry.register(Box::new(jobs_registered.clone()))?;
        registry.register(Box::new(jobs_running.clone()))?;
        registry.register(Box::new(jobs_finished.clone()))?;
        Ok(Self {
            jobs_registered,
            jobs_running,
            jobs_finished,
            registry,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
