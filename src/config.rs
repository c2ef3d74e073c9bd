//! YAML configuration model and assembly of configured jobs.

use std::{path::Path, path::PathBuf, sync::Arc, time::Duration};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    job::Job,
    metrics::Metrics,
    runner::CommandRunner,
    schedule::{Schedule, ScheduleSpec},
};

/// Top-level configuration tree. `jobs` is required and must be
/// non-empty; the service sections are off by default.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub jobs: Vec<JobConfig>,
    #[serde(default)]
    pub management: ManagementConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text)?;
        if config.jobs.is_empty() {
            return Err(Error::NoJobs);
        }
        Ok(config)
    }
}

/// One job as the operator wrote it.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub id: String,
    /// Program and arguments, at least one element.
    pub command: Vec<String>,
    /// Capture files, opened append+create.
    #[serde(default)]
    pub stdout: Option<PathBuf>,
    #[serde(default)]
    pub stderr: Option<PathBuf>,
    /// False forbids overlapping invocations.
    #[serde(default)]
    pub parallel: bool,
    /// Duration string such as "30s" or "2m"; empty means no timeout.
    #[serde(default)]
    pub timeout: String,
    pub schedule: Vec<ScheduleSpec>,
}

impl JobConfig {
    /// Assemble the runnable job: parse its schedules, bind the command
    /// runner with the shared cancel signal and metrics.
    pub fn build(&self, cancel: CancellationToken, metrics: Arc<Metrics>) -> Result<Job> {
        let schedules = self
            .schedule
            .iter()
            .map(Schedule::new)
            .collect::<Result<Vec<_>>>()?;
        let runner = CommandRunner::new(
            &self.id,
            self.command.clone(),
            self.stdout.clone(),
            self.stderr.clone(),
            self.parallel,
            self.timeout()?,
            cancel,
            metrics,
        )?;
        Job::new(&self.id, Arc::new(runner), schedules)
    }

    fn timeout(&self) -> Result<Option<Duration>> {
        let text = self.timeout.trim();
        if text.is_empty() {
            return Ok(None);
        }
        humantime::parse_duration(text)
            .map(Some)
            .map_err(|source| Error::BadTimeout {
                input: text.to_string(),
                source,
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    pub enabled: bool,
    pub address: String,
    /// Seconds `pause` waits for in-flight jobs to drain.
    pub scheduler_stop_timeout: u64,
    /// Seconds between the global cancel and process exit.
    pub jobs_termination_timeout: u64,
}

impl ManagementConfig {
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler_stop_timeout)
    }

    #[must_use]
    pub fn termination_timeout(&self) -> Duration {
        Duration::from_secs(self.jobs_termination_timeout)
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:8090".to_string(),
            scheduler_stop_timeout: 30,
            jobs_termination_timeout: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter, overridable with `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
jobs:
  - id: backup
    command: ["/usr/local/bin/backup", "--quiet"]
    stdout: /var/log/backup.out
    parallel: false
    timeout: 30m
    schedule:
      - minute: "0"
        hour: "2"
        day: "*"
        month: "*"
        location: UTC
management:
  enabled: true
  address: 127.0.0.1:8090
metrics:
  enabled: true
  address: 127.0.0.1:9090
logging:
  level: debug
"#;

    #[test]
    fn sample_config_parses() -> Result<()> {
        let config: Config = serde_yaml::from_str(SAMPLE)?;
        assert_eq!(config.jobs.len(), 1);
        let job = &config.jobs[0];
        assert_eq!(job.id, "backup");
        assert_eq!(job.timeout()?, Some(Duration::from_secs(30 * 60)));
        assert!(!job.parallel);
        assert!(config.management.enabled);
        assert_eq!(config.logging.level, "debug");
        // Defaulted sections keep their defaults.
        assert_eq!(config.management.scheduler_stop_timeout, 30);
        Ok(())
    }

    #[test]
    fn job_builds_into_a_schedulable_unit() -> Result<()> {
        let config: Config = serde_yaml::from_str(SAMPLE)?;
        let metrics = Arc::new(Metrics::new()?);
        let job = config.jobs[0].build(CancellationToken::new(), metrics)?;
        assert_eq!(job.id(), "backup");
        assert!(job.next(&jiff::Zoned::now()).is_ok());
        Ok(())
    }

    #[test]
    fn empty_timeout_means_no_timeout() -> Result<()> {
        let job = JobConfig {
            id: "x".into(),
            command: vec!["true".into()],
            stdout: None,
            stderr: None,
            parallel: true,
            timeout: String::new(),
            schedule: Vec::new(),
        };
        assert_eq!(job.timeout()?, None);
        Ok(())
    }

    #[test]
    fn malformed_timeout_is_rejected() {
        let job = JobConfig {
            id: "x".into(),
            command: vec!["true".into()],
            stdout: None,
            stderr: None,
            parallel: true,
            timeout: "half an hour".into(),
            schedule: Vec::new(),
        };
        assert!(matches!(job.timeout(), Err(Error::BadTimeout { .. })));
    }

    #[test]
    fn config_without_jobs_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "jobs: []\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::NoJobs)));
    }
}
