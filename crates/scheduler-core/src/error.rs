//! Error taxonomy for the job scheduler
//!
//! Mirrors the error kinds laid out for the scheduler: input errors are the
//! caller's fault and never retried; capacity errors are transient; state
//! errors tell the caller an operation no longer applies; lifecycle errors
//! reflect scheduler start/stop state; execution and timeout errors are
//! captured on the job itself rather than propagated here.

use crate::job::JobId;

/// Result type alias used throughout the scheduler.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    // --- Input errors: caller's fault, never retried ---
    #[error("a job with id {0} already exists")]
    DuplicateId(JobId),

    #[error("job field invalid: {0}")]
    Invalid(String),

    #[error("no executor registered for job type {0:?}")]
    NoExecutorForType(String),

    // --- Capacity errors: transient, caller may back off ---
    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    // --- State errors: semantic, operation no longer applies ---
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} cannot be cancelled, it is already terminal")]
    NotCancellable(JobId),

    #[error("job {0} is not retryable (status is not Failed, or retries exhausted)")]
    NotRetryable(JobId),

    #[error("illegal transition for job {job}: {from:?} -> {to:?}")]
    IllegalState {
        job: JobId,
        from: &'static str,
        to: &'static str,
    },

    // --- Lifecycle errors: reflect scheduler start/stop state ---
    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("scheduler already stopped")]
    AlreadyStopped,

    #[error("scheduler has been shut down")]
    Shutdown,

    #[error("stop timed out waiting for workers to drain")]
    StopTimeout,

    #[error("an executor for type {0:?} is already registered")]
    AlreadyRegistered(String),

    // --- Execution / timeout errors: captured on the job, surfaced via Get/List ---
    #[error("{0}")]
    Execution(String),

    #[error("timeout")]
    Timeout,
}

impl SchedulerError {
    /// Whether this error reflects caller misuse rather than transient/runtime state.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::DuplicateId(_)
                | SchedulerError::Invalid(_)
                | SchedulerError::NoExecutorForType(_)
        )
    }

    /// Whether a caller may reasonably retry the *submission* (not the job itself).
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::QueueFull { .. })
    }
}
