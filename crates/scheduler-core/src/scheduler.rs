//! The scheduler itself: owns the job table, queue, executor registry and
//! worker pool, and exposes the operations callers submit work through.
//!
//! Shaped after the teacher's `JobScheduler::start`/`run` lifecycle (spawn
//! a loop task, hold a join handle, cancel and join on shutdown) but
//! dispatching in-process instead of polling Redis, and owning the job
//! table directly (`DashMap<JobId, Job>`) instead of delegating reads to a
//! separate store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{Event, EventSink, NullEventSink};
use crate::job::{Job, JobId, JobPriority, JobQuery, JobSpec, JobStatus};
use crate::queue::{PriorityQueue, QueueItem};
use crate::registry::{ExecutorOptions, ExecutorRegistry, JobExecutor};
use crate::worker::{Worker, WorkerStats};

/// State shared between the scheduler handle and every worker task. Not
/// exposed outside the crate; `Scheduler` is the public surface.
pub(crate) struct Shared {
    pub config: SchedulerConfig,
    pub jobs: Arc<DashMap<JobId, Job>>,
    pub running_tokens: DashMap<JobId, CancellationToken>,
    pub queue: PriorityQueue,
    pub registry: ExecutorRegistry,
    pub sink: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub sequence: AtomicU64,
    /// The scheduler-wide cancellable. Cancelled immediately by `stop()`
    /// (not after `grace` elapses — `grace` only bounds how long `stop`
    /// waits for workers to notice and unwind). Every per-job-attempt token
    /// is a child of this one, so cancelling it reaches every running job
    /// at once; `Cancel(id)` cancels only that job's child token.
    pub shutdown_signal: CancellationToken,
}

impl Shared {
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

/// Snapshot of one worker's counters, tagged with its id, as returned by
/// `Scheduler::stats`.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStatsEntry {
    pub stats: WorkerStats,
}

/// Aggregate scheduler statistics.
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub total_jobs: usize,
    pub pending: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub queue_len: usize,
    pub worker_count: usize,
    pub average_runtime: Duration,
}

/// In-process priority job scheduler. Wrap in an `Arc` to share a handle
/// across tasks; its own state is all interior-mutable.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: std::sync::Mutex<Vec<Arc<Worker>>>,
    worker_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    reaper_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    promotion_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_collaborators(config, Arc::new(SystemClock), Arc::new(UuidGenerator))
    }

    /// Construct with an injected clock and id generator, for deterministic
    /// tests.
    pub fn with_collaborators(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self::build(config, clock, ids, Arc::new(NullEventSink))
    }

    /// Construct with an event sink wired in from the start, so every
    /// lifecycle event (including the ones `submit`/`cancel`/`retry`
    /// publish) reaches it.
    pub fn with_event_sink(config: SchedulerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::build(config, Arc::new(SystemClock), Arc::new(UuidGenerator), sink)
    }

    fn build(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let jobs = Arc::new(DashMap::new());
        let queue = PriorityQueue::new(config.queue_size, clock.clone(), jobs.clone());
        let shared = Arc::new(Shared {
            jobs,
            running_tokens: DashMap::new(),
            queue,
            registry: ExecutorRegistry::new(),
            sink,
            clock,
            ids,
            sequence: AtomicU64::new(0),
            shutdown_signal: CancellationToken::new(),
            config,
        });
        Self {
            shared,
            workers: std::sync::Mutex::new(Vec::new()),
            worker_handles: std::sync::Mutex::new(Vec::new()),
            reaper_handle: std::sync::Mutex::new(None),
            promotion_handle: std::sync::Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn register_executor(
        &self,
        job_type: impl Into<String>,
        executor: Arc<dyn JobExecutor>,
    ) -> SchedulerResult<()> {
        self.shared.registry.register(job_type, executor, ExecutorOptions::default())
    }

    pub fn register_executor_with_options(
        &self,
        job_type: impl Into<String>,
        executor: Arc<dyn JobExecutor>,
        options: ExecutorOptions,
    ) -> SchedulerResult<()> {
        self.shared.registry.register(job_type, executor, options)
    }

    /// Submit a job for immediate execution (subject to priority ordering
    /// and worker availability).
    pub async fn submit(&self, spec: JobSpec) -> SchedulerResult<JobId> {
        self.submit_internal(spec, None).await
    }

    /// Submit a job that only becomes eligible to run at `at`.
    pub async fn schedule(&self, spec: JobSpec, at: DateTime<Utc>) -> SchedulerResult<JobId> {
        self.submit_internal(spec, Some(at)).await
    }

    async fn submit_internal(&self, spec: JobSpec, scheduled_at: Option<DateTime<Utc>>) -> SchedulerResult<JobId> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::Shutdown);
        }

        let id = match spec.id.filter(|id| !id.is_empty()) {
            Some(id) => {
                if self.shared.jobs.contains_key(&id) {
                    return Err(SchedulerError::DuplicateId(id));
                }
                id
            }
            None => self.shared.ids.generate(),
        };

        if self.shared.config.strict_executor_check && !self.shared.registry.is_registered(&spec.job_type) {
            return Err(SchedulerError::NoExecutorForType(spec.job_type));
        }
        let options = self.shared.registry.options_for(&spec.job_type);

        let now = self.shared.clock.now();
        let timeout = spec
            .timeout
            .or(options.default_timeout)
            .unwrap_or(self.shared.config.job_timeout);
        let max_retries = spec
            .max_retries
            .or(options.default_max_retries)
            .unwrap_or(self.shared.config.max_retries);
        let priority = spec.priority.unwrap_or_default();
        let eligible_at = scheduled_at.unwrap_or(now);

        let job = Job {
            id: id.clone(),
            job_type: spec.job_type,
            priority,
            payload: spec.payload,
            status: if eligible_at <= now { JobStatus::Queued } else { JobStatus::Pending },
            scheduled_at,
            created_at: now,
            started_at: None,
            completed_at: None,
            timeout,
            retry_count: 0,
            max_retries,
            worker_id: None,
            progress: 0,
            result: None,
            error: None,
            submit_sequence: self.shared.next_sequence(),
        };
        job.validate()?;

        self.shared.queue.enqueue(QueueItem {
            id: job.id.clone(),
            priority: job.priority as u8,
            eligible_at,
            submit_sequence: job.submit_sequence,
        })?;

        self.shared.jobs.insert(id.clone(), job.clone());

        let event = if scheduled_at.is_some() {
            Event::Scheduled(job)
        } else {
            Event::Submitted(job)
        };
        self.shared.sink.publish(event).await;

        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.shared.jobs.get(id).map(|j| j.clone())
    }

    pub fn list(&self, query: JobQuery) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .shared
            .jobs
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|job| query.status.map_or(true, |s| job.status == s))
            .filter(|job| query.job_type.as_deref().map_or(true, |t| job.job_type == t))
            .collect();
        jobs.sort_by_key(|j| j.submit_sequence);

        if let Some(offset) = query.offset {
            jobs = jobs.into_iter().skip(offset).collect();
        }
        if let Some(limit) = query.limit {
            jobs.truncate(limit);
        }
        jobs
    }

    /// Cancel a job. Queued/Pending jobs are removed from the queue and
    /// marked `Cancelled` directly; a `Running` job's cooperative
    /// cancellation token is signalled and the worker running it finalizes
    /// the `Cancelled` status once the executor unwinds.
    pub async fn cancel(&self, id: &str) -> SchedulerResult<()> {
        let mut job = self
            .shared
            .jobs
            .get(id)
            .map(|j| j.clone())
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        match job.status {
            JobStatus::Pending | JobStatus::Queued => {
                self.shared.queue.remove(id);
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(self.shared.clock.now());
                self.shared.jobs.insert(id.to_string(), job.clone());
                self.shared.sink.publish(Event::Cancelled(job)).await;
                Ok(())
            }
            JobStatus::Running => {
                if let Some(token) = self.shared.running_tokens.get(id) {
                    token.cancel();
                }
                Ok(())
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                Err(SchedulerError::NotCancellable(id.to_string()))
            }
        }
    }

    /// Re-queue a terminally `Failed` job for one further attempt. Only
    /// valid on `Failed` jobs. `retry_count` is left exactly as the
    /// exhausted auto-retry loop left it (at `max_retries`) — this grants
    /// one additional attempt without raising the retry budget; if that
    /// attempt fails too, the normal `retry_count < max_retries` check in
    /// the worker's failure path is already false, so it goes straight back
    /// to `Failed` rather than looping. A job that failed and is still
    /// retry-eligible is retried automatically by the worker and never
    /// needs this call.
    pub async fn retry(&self, id: &str) -> SchedulerResult<()> {
        let mut job = self
            .shared
            .jobs
            .get(id)
            .map(|j| j.clone())
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        if job.status != JobStatus::Failed {
            return Err(SchedulerError::NotRetryable(id.to_string()));
        }

        let now = self.shared.clock.now();
        job.status = JobStatus::Queued;
        job.started_at = None;
        job.completed_at = None;
        job.error = None;
        job.worker_id = None;
        job.progress = 0;
        job.submit_sequence = self.shared.next_sequence();

        self.shared.queue.enqueue(QueueItem {
            id: job.id.clone(),
            priority: job.priority as u8,
            eligible_at: now,
            submit_sequence: job.submit_sequence,
        })?;
        self.shared.jobs.insert(id.to_string(), job.clone());
        self.shared.sink.publish(Event::Retried(job)).await;
        Ok(())
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            total_jobs: 0,
            pending: 0,
            queued: 0,
            running: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            queue_len: self.shared.queue.len(),
            worker_count: self.workers.lock().unwrap().len(),
            average_runtime: Duration::ZERO,
        };

        for entry in self.shared.jobs.iter() {
            stats.total_jobs += 1;
            match entry.value().status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }

        let workers = self.workers.lock().unwrap();
        let (total_runtime, total_processed): (Duration, u64) = workers.iter().fold(
            (Duration::ZERO, 0u64),
            |(time_acc, count_acc), worker| {
                let s = worker.stats();
                (time_acc + s.cumulative_runtime, count_acc + s.jobs_processed)
            },
        );
        if total_processed > 0 {
            stats.average_runtime = total_runtime / total_processed as u32;
        }

        stats
    }

    pub fn worker_stats(&self) -> Vec<WorkerStatsEntry> {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .map(|w| WorkerStatsEntry { stats: w.stats() })
            .collect()
    }

    /// Spawn the worker pool (and the cleanup reaper, if configured).
    /// Submitting jobs before `start()` is fine; they simply sit in the
    /// queue until workers exist to drain it.
    pub async fn start(&self) -> SchedulerResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let mut workers = self.workers.lock().unwrap();
        let mut handles = self.worker_handles.lock().unwrap();
        for i in 0..self.shared.config.max_workers {
            let worker = Arc::new(Worker::new(format!("worker-{i}"), self.shared.clone()));
            let run_worker = worker.clone();
            let shutdown = self.shared.shutdown_signal.clone();
            let handle = tokio::spawn(async move { run_worker.run(shutdown).await });
            workers.push(worker);
            handles.push(handle);
        }
        drop(workers);
        drop(handles);

        if let Some(interval) = self.shared.config.cleanup_interval {
            let shared = self.shared.clone();
            let shutdown = self.shared.shutdown_signal.clone();
            let retention = self.shared.config.retention_window;
            let handle = tokio::spawn(async move {
                reap_loop(shared, shutdown, interval.0, retention).await;
            });
            *self.reaper_handle.lock().unwrap() = Some(handle);
        }

        // Promotes delayed jobs (and flips their status to `Queued`) on its
        // own schedule, independent of whether any worker happens to be idle
        // and calling `dequeue` — otherwise a scheduled job sitting behind a
        // full bank of busy workers would stay `Pending` long after it
        // became eligible.
        let shared = self.shared.clone();
        let shutdown = self.shared.shutdown_signal.clone();
        let handle = tokio::spawn(async move { promotion_loop(shared, shutdown).await });
        *self.promotion_handle.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Trigger the shared cancellation immediately — every blocked dequeue
    /// unwinds and every running executor's token is signalled at once —
    /// then wait up to `grace` for every worker to actually finish and
    /// return. `grace` bounds the wait; it does not delay the signal.
    pub async fn stop(&self, grace: Duration) -> SchedulerResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStopped);
        }

        self.shared.shutdown_signal.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut self.worker_handles.lock().unwrap());
        let join_all = futures_join_all(handles);

        let finished_in_time = tokio::time::timeout(grace, join_all).await.is_ok();

        if let Some(handle) = self.reaper_handle.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.promotion_handle.lock().unwrap().take() {
            handle.abort();
        }

        if finished_in_time {
            Ok(())
        } else {
            Err(SchedulerError::StopTimeout)
        }
    }
}

/// Small local stand-in for `futures::future::join_all` so the crate
/// doesn't need to pull in the `futures` crate for one call site.
async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn reap_loop(shared: Arc<Shared>, shutdown: CancellationToken, interval: Duration, retention: Duration) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => return,
        }

        let now = shared.clock.now();
        let retention = chrono::Duration::from_std(retention).unwrap_or_default();
        let mut to_remove = Vec::new();
        for entry in shared.jobs.iter() {
            let job = entry.value();
            if job.status.is_terminal() {
                if let Some(completed_at) = job.completed_at {
                    if now - completed_at > retention {
                        to_remove.push(job.id.clone());
                    }
                }
            }
        }
        for id in to_remove {
            shared.jobs.remove(&id);
        }
    }
}

async fn promotion_loop(shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        shared.queue.wait_for_next_promotion(&shutdown).await;
        if shutdown.is_cancelled() {
            return;
        }
        shared.queue.promote_due_now();
    }
}
