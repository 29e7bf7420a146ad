//! Job types and definitions

use serde::{Deserialize, Serialize};
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::SchedulerError;

/// Unique job identifier. Caller-supplied or scheduler-assigned; either way
/// a plain string, not aliased by any other live job.
pub type JobId = String;

/// Job priority levels. Higher variants sort first out of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobPriority {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Medium
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Low => write!(f, "low"),
            JobPriority::Medium => write!(f, "medium"),
            JobPriority::High => write!(f, "high"),
            JobPriority::Critical => write!(f, "critical"),
        }
    }
}

/// Job execution status. See the scheduler's state machine for legal
/// transitions between these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Submitted but not yet eligible to run (future `scheduled_at`).
    Pending,
    /// Eligible and waiting in the ready queue.
    Queued,
    /// Currently executing on a worker.
    Running,
    /// Finished successfully; `result` populated.
    Completed,
    /// Finished unsuccessfully and out of retries; `error` populated.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl JobStatus {
    /// Terminal statuses are never mutated further except by the reaper.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// A single unit of work tracked by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub priority: JobPriority,
    pub payload: serde_json::Value,
    pub status: JobStatus,

    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub timeout: std::time::Duration,
    pub retry_count: u32,
    pub max_retries: u32,

    pub worker_id: Option<String>,
    pub progress: u8,

    pub result: Option<serde_json::Value>,
    pub error: Option<String>,

    /// Monotonic submission order, used to break priority ties FIFO.
    #[serde(default)]
    pub(crate) submit_sequence: u64,
}

impl Job {
    /// Validate the fields a caller may set on ingest. Defaulting of `id`,
    /// `priority`, `timeout`, `max_retries` happens in the scheduler, which
    /// knows its own configured defaults; this only rejects values that can
    /// never be valid regardless of config.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.job_type.trim().is_empty() {
            return Err(SchedulerError::Invalid("job type must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(SchedulerError::Invalid("timeout must be > 0".into()));
        }
        Ok(())
    }

    /// True if `progress` is in the documented 0-100 range.
    pub fn progress_in_range(&self) -> bool {
        self.progress <= 100
    }
}

/// A partial job as supplied by a caller to `Submit`/`Schedule`. Any field
/// left at its default is filled in by the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub id: Option<JobId>,
    pub job_type: String,
    #[serde(default)]
    pub priority: Option<JobPriority>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub timeout: Option<std::time::Duration>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl JobSpec {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: None,
            job_type: job_type.into(),
            priority: None,
            payload,
            timeout: None,
            max_retries: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Filter + pagination parameters for `List`.
#[derive(Debug, Default, Clone)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}
