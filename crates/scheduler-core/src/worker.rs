//! Worker: the loop that pulls a job id off the queue, runs its executor,
//! and records the outcome.
//!
//! Structurally this is the teacher's `Worker::run` dequeue-process-record
//! loop, translated off a Redis list pop onto the in-memory priority queue
//! and carrying counters the same way (`jobs_processed`, `jobs_succeeded`,
//! plus `cumulative_runtime` so `Scheduler::stats` can report an average).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::events::Event;
use crate::job::{JobStatus, JobId};
use crate::scheduler::Shared;

/// Snapshot of one worker's lifetime counters.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub cumulative_runtime: Duration,
}

impl WorkerStats {
    pub fn success_rate(&self) -> f64 {
        if self.jobs_processed == 0 {
            0.0
        } else {
            self.jobs_succeeded as f64 / self.jobs_processed as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    runtime_nanos: AtomicU64,
}

/// One worker task. Owns nothing the scheduler doesn't also reach through
/// `Shared`; its only private state is its own counters.
pub struct Worker {
    pub id: String,
    shared: Arc<Shared>,
    counters: Counters,
}

impl Worker {
    pub fn new(id: impl Into<String>, shared: Arc<Shared>) -> Self {
        Self {
            id: id.into(),
            shared,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            jobs_processed: self.counters.processed.load(Ordering::Relaxed),
            jobs_succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            jobs_failed: self.counters.failed.load(Ordering::Relaxed),
            cumulative_runtime: Duration::from_nanos(self.counters.runtime_nanos.load(Ordering::Relaxed)),
        }
    }

    /// Drain the queue until `stop` fires, finishing any job already in
    /// flight before exiting.
    pub async fn run(&self, stop: CancellationToken) {
        loop {
            let job_id = match self.shared.queue.dequeue(&stop).await {
                Some(id) => id,
                None => return,
            };
            self.process(job_id).await;
        }
    }

    async fn process(&self, job_id: JobId) {
        let Some(mut job) = self.shared.jobs.get(&job_id).map(|j| j.clone()) else {
            // Job was removed from the table (e.g. cancelled) between
            // dequeue and pickup.
            return;
        };
        if job.status.is_terminal() || job.status == JobStatus::Running {
            return;
        }

        let started_at = self.shared.clock.now();
        job.status = JobStatus::Running;
        job.started_at = Some(started_at);
        job.worker_id = Some(self.id.clone());
        self.shared.jobs.insert(job_id.clone(), job.clone());
        self.shared.sink.publish(Event::Started(job.clone())).await;

        let job_token = self.shared.shutdown_signal.child_token();
        self.shared.running_tokens.insert(job_id.clone(), job_token.clone());

        let executor = self.shared.registry.get(&job.job_type);
        let outcome = match executor {
            Some(executor) => {
                let progress = crate::registry::ProgressHandle::new(self.shared.clone(), job_id.clone());
                let run_fut = executor.run(&job, job_token.clone(), progress);
                // `biased` so a cancellation that fires in the same poll as
                // the executor returning always wins: the contract is that
                // a cancelled attempt's result/error is discarded, not
                // raced against.
                tokio::select! {
                    biased;
                    _ = job_token.cancelled() => Outcome::Cancelled,
                    result = tokio::time::timeout(job.timeout, run_fut) => match result {
                        Ok(Ok(value)) => Outcome::Success(value),
                        Ok(Err(message)) => Outcome::Failure(message),
                        Err(_) => Outcome::Timeout,
                    },
                }
            }
            None => Outcome::NoExecutor(format!("no executor registered for job type {:?}", job.job_type)),
        };

        self.shared.running_tokens.remove(&job_id);

        // Pick up any progress the executor reported via `ProgressHandle`
        // while it ran; `job` is otherwise this worker's own authoritative
        // copy and everything else about it is unchanged.
        if let Some(latest) = self.shared.jobs.get(&job_id) {
            job.progress = latest.progress;
        }

        let completed_at = self.shared.clock.now();
        let runtime = (completed_at - started_at).to_std().unwrap_or(Duration::ZERO);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .runtime_nanos
            .fetch_add(runtime.as_nanos() as u64, Ordering::Relaxed);

        match outcome {
            Outcome::Success(value) => {
                job.status = JobStatus::Completed;
                job.completed_at = Some(completed_at);
                job.result = Some(value);
                job.progress = 100;
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                self.shared.jobs.insert(job_id.clone(), job.clone());
                self.shared.sink.publish(Event::Completed(job)).await;
            }
            Outcome::Cancelled => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(completed_at);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.shared.jobs.insert(job_id.clone(), job.clone());
                self.shared.sink.publish(Event::Cancelled(job)).await;
            }
            Outcome::Timeout => {
                self.finish_failure(&mut job, completed_at, "timeout".to_string(), true).await;
            }
            Outcome::Failure(message) => {
                self.finish_failure(&mut job, completed_at, message, true).await;
            }
            Outcome::NoExecutor(message) => {
                // Permanent failure: a mis-typed job would otherwise retry
                // forever against an executor that will never exist.
                self.finish_failure(&mut job, completed_at, message, false).await;
            }
        }
    }

    /// Apply a failed attempt to `job`, either re-queuing it for another
    /// attempt (clearing the per-attempt fields per the retry contract) or
    /// marking it terminally `Failed`. `retryable = false` forces terminal
    /// failure regardless of remaining retries (used for `NoExecutorForType`,
    /// which would otherwise retry forever against a type that will never
    /// resolve).
    async fn finish_failure(
        &self,
        job: &mut crate::job::Job,
        completed_at: chrono::DateTime<Utc>,
        message: String,
        retryable: bool,
    ) {
        if retryable && job.retry_count < job.max_retries {
            job.retry_count += 1;
            let delay = self.shared.config.retry_backoff.delay_for_attempt(job.retry_count);
            let eligible_at = completed_at + chrono::Duration::from_std(delay).unwrap_or_default();
            job.status = if delay.is_zero() { JobStatus::Queued } else { JobStatus::Pending };
            job.started_at = None;
            job.completed_at = None;
            job.worker_id = None;
            job.error = None;
            job.progress = 0;
            self.shared.jobs.insert(job.id.clone(), job.clone());
            let sequence = self.shared.next_sequence();
            let _ = self.shared.queue.enqueue(crate::queue::QueueItem {
                id: job.id.clone(),
                priority: job.priority as u8,
                eligible_at,
                submit_sequence: sequence,
            });
            self.shared.sink.publish(Event::Retried(job.clone())).await;
        } else {
            job.error = Some(message);
            job.status = JobStatus::Failed;
            job.completed_at = Some(completed_at);
            job.worker_id = None;
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.shared.jobs.insert(job.id.clone(), job.clone());
            self.shared.sink.publish(Event::Failed(job.clone())).await;
        }
    }
}

enum Outcome {
    Success(serde_json::Value),
    Failure(String),
    Timeout,
    Cancelled,
    NoExecutor(String),
}
