//! Scheduler configuration
//!
//! Same shape as the teacher's top-level `Config`: every field has a
//! `#[serde(default = "fn")]` so a default-constructed (or empty-file)
//! config is always valid, loadable either from a TOML file or from the
//! environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backoff::RetryBackoff;
use crate::error::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker tasks running concurrently.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Maximum number of jobs the queue will hold at once (ready + delayed).
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Default per-job timeout, used when a submitted job doesn't set one.
    #[serde(default = "default_job_timeout", with = "humantime_serde")]
    pub job_timeout: Duration,

    /// Default max retry attempts, used when a submitted job doesn't set one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How often the reaper sweeps terminal jobs older than `retention_window`.
    /// `None` disables the reaper entirely (the default).
    #[serde(default)]
    pub cleanup_interval: Option<CleanupInterval>,

    /// How long a terminal job is kept in the job table before the reaper
    /// may evict it.
    #[serde(default = "default_retention_window", with = "humantime_serde")]
    pub retention_window: Duration,

    /// Capacity of the lifecycle event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Delay applied before a retried job becomes eligible again.
    #[serde(default)]
    pub retry_backoff: RetryBackoff,

    /// When set, `Submit`/`Schedule` reject a job whose `job_type` has no
    /// registered executor yet with `NoExecutorForType`. When unset (the
    /// default), submission of an as-yet-unregistered type succeeds; the
    /// job only fails — permanently, not retried — once a worker dequeues
    /// it and finds no executor registered for its type.
    #[serde(default)]
    pub strict_executor_check: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_size: default_queue_size(),
            job_timeout: default_job_timeout(),
            max_retries: default_max_retries(),
            cleanup_interval: None,
            retention_window: default_retention_window(),
            event_buffer: default_event_buffer(),
            retry_backoff: RetryBackoff::default(),
            strict_executor_check: false,
        }
    }
}

/// Thin wrapper so the interval round-trips through TOML as a duration
/// string (`"5m"`) rather than a raw nanosecond count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CleanupInterval(#[serde(with = "humantime_serde")] pub Duration);

fn default_max_workers() -> usize {
    10
}

fn default_queue_size() -> usize {
    1000
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retention_window() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_event_buffer() -> usize {
    1000
}

impl SchedulerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> SchedulerResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::Invalid(format!("failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| SchedulerError::Invalid(format!("failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the environment: `STREAMGATE_CONFIG` if set,
    /// else a couple of conventional paths, else the built-in defaults.
    pub fn from_env() -> SchedulerResult<Self> {
        if let Ok(path) = std::env::var("STREAMGATE_CONFIG") {
            return Self::load(&path);
        }

        let default_paths = ["./config/scheduler.toml", "/etc/streamgate/scheduler.toml"];
        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Reject configurations that can never produce a working scheduler.
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_workers == 0 {
            return Err(SchedulerError::Invalid("max_workers must be > 0".into()));
        }
        if self.queue_size == 0 {
            return Err(SchedulerError::Invalid("queue_size must be > 0".into()));
        }
        if self.job_timeout.is_zero() {
            return Err(SchedulerError::Invalid("job_timeout must be > 0".into()));
        }
        if self.event_buffer == 0 {
            return Err(SchedulerError::Invalid("event_buffer must be > 0".into()));
        }
        Ok(())
    }
}
