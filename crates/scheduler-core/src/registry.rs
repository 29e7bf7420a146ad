//! Executor registry: maps a job's `job_type` to the code that runs it.
//!
//! Mirrors the shape of the teacher's `JobHandler` trait, generalized from
//! a single process-wide handler map to one keyed per job type, backed by
//! the same `DashMap` the teacher reaches for whenever a map is read far
//! more often than it's written.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::job::{Job, JobId};
use crate::scheduler::Shared;

/// A dedicated thread-safe setter handed to an executor so it can report
/// progress (0-100) on its own job while it runs, without otherwise being
/// able to touch any other job field. Writes land directly in the
/// scheduler's job table, so `Get`/`List` observe progress updates from a
/// still-`Running` job.
#[derive(Clone)]
pub struct ProgressHandle {
    shared: Arc<Shared>,
    job_id: JobId,
}

impl ProgressHandle {
    pub(crate) fn new(shared: Arc<Shared>, job_id: JobId) -> Self {
        Self { shared, job_id }
    }

    /// Set progress, clamped to the documented 0-100 range. A no-op if the
    /// job has already left `Running` (e.g. it was cancelled or timed out
    /// concurrently) so a late update from an unwinding executor can't
    /// resurrect a terminal job's fields.
    pub fn set(&self, value: u8) {
        let value = value.min(100);
        if let Some(mut job) = self.shared.jobs.get_mut(&self.job_id) {
            if job.status == crate::job::JobStatus::Running {
                job.progress = value;
            }
        }
    }
}

/// Executes one job. Implementations should honor `cancellation` promptly:
/// once it fires, work in progress should wind down rather than run to
/// completion. May call `progress.set(..)` to report 0-100 completion; must
/// not otherwise mutate any job field (the scheduler owns the rest).
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run(
        &self,
        job: &Job,
        cancellation: CancellationToken,
        progress: ProgressHandle,
    ) -> Result<serde_json::Value, String>;
}

/// A `JobExecutor` built directly from an async closure, for callers who
/// don't want to define a type for every job.
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F, Fut> JobExecutor for FnExecutor<F>
where
    F: Fn(Job, CancellationToken, ProgressHandle) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<serde_json::Value, String>> + Send,
{
    async fn run(
        &self,
        job: &Job,
        cancellation: CancellationToken,
        progress: ProgressHandle,
    ) -> Result<serde_json::Value, String> {
        (self.0)(job.clone(), cancellation, progress).await
    }
}

/// Optional per-job-type overrides for defaults the scheduler would
/// otherwise fall back to from its own config.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    pub default_timeout: Option<std::time::Duration>,
    pub default_max_retries: Option<u32>,
}

struct Registration {
    executor: Arc<dyn JobExecutor>,
    options: ExecutorOptions,
}

/// Thread-safe map from job type to executor. Never holds its lock while
/// an executor runs: lookups clone the `Arc` out and release immediately.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: DashMap<String, Registration>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: DashMap::new(),
        }
    }

    /// Register an executor for a job type. Fails if one is already
    /// registered for that type; re-registration requires an explicit
    /// `unregister` first.
    pub fn register(
        &self,
        job_type: impl Into<String>,
        executor: Arc<dyn JobExecutor>,
        options: ExecutorOptions,
    ) -> Result<(), SchedulerError> {
        let job_type = job_type.into();
        if self.executors.contains_key(&job_type) {
            return Err(SchedulerError::AlreadyRegistered(job_type));
        }
        self.executors.insert(job_type, Registration { executor, options });
        Ok(())
    }

    pub fn unregister(&self, job_type: &str) -> bool {
        self.executors.remove(job_type).is_some()
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.executors.contains_key(job_type)
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobExecutor>> {
        self.executors.get(job_type).map(|r| r.executor.clone())
    }

    pub fn options_for(&self, job_type: &str) -> ExecutorOptions {
        self.executors
            .get(job_type)
            .map(|r| r.options.clone())
            .unwrap_or_default()
    }
}
