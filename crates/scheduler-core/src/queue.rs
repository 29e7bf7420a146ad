//! Priority queue: the ordered waiting room jobs pass through before a
//! worker picks them up.
//!
//! Bounded, thread-safe, FIFO within a priority class, strict priority
//! across classes, and aware of delayed (future `scheduled_at`) jobs. A
//! binary heap keyed on `(priority desc, eligible_at asc, submit_sequence
//! asc)` plus a `tokio::sync::Notify` to wake blocked dequeuers is the
//! minimal correct structure the scheduler's design calls for; jobs whose
//! eligibility is in the future live in a second, time-ordered heap and are
//! promoted into the ready heap as their time arrives.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::job::{Job, JobId, JobStatus};

/// One slot in the queue: enough to order dispatch without holding the full
/// `Job` (which lives in the scheduler's job table).
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: JobId,
    pub priority: u8,
    pub eligible_at: DateTime<Utc>,
    pub submit_sequence: u64,
}

#[derive(Debug, Clone)]
struct ReadyEntry(QueueItem);

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.submit_sequence == other.0.submit_sequence
    }
}
impl Eq for ReadyEntry {}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority must compare greater,
        // and within equal priority the earlier submission must compare
        // greater (so it pops first) -> reverse submit_sequence.
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.submit_sequence.cmp(&self.0.submit_sequence))
    }
}
impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct DelayedEntry(QueueItem);

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.eligible_at == other.0.eligible_at && self.0.submit_sequence == other.0.submit_sequence
    }
}
impl Eq for DelayedEntry {}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap behavior: earliest eligible_at must pop first, so reverse
        // the natural ordering (BinaryHeap pops the greatest element).
        other
            .0
            .eligible_at
            .cmp(&self.0.eligible_at)
            .then_with(|| other.0.submit_sequence.cmp(&self.0.submit_sequence))
    }
}
impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    ready: BinaryHeap<ReadyEntry>,
    delayed: BinaryHeap<DelayedEntry>,
}

impl Inner {
    fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    /// Move any delayed jobs whose time has come into the ready heap,
    /// flipping the matching job's status from `Pending` to `Queued` in the
    /// same step — a job promoted into the ready heap but still reporting
    /// `Pending` to `Get`/`List` would violate "a job is in the queue iff
    /// its status is Queued".
    fn promote_due(&mut self, now: DateTime<Utc>, jobs: &DashMap<JobId, Job>) {
        while let Some(top) = self.delayed.peek() {
            if top.0.eligible_at <= now {
                let DelayedEntry(item) = self.delayed.pop().unwrap();
                if let Some(mut job) = jobs.get_mut(&item.id) {
                    if job.status == JobStatus::Pending {
                        job.status = JobStatus::Queued;
                    }
                }
                self.ready.push(ReadyEntry(item));
            } else {
                break;
            }
        }
    }
}

/// Bounded priority+delay queue shared by all workers of one scheduler.
pub struct PriorityQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    notify: tokio::sync::Notify,
    clock: std::sync::Arc<dyn Clock>,
    jobs: Arc<DashMap<JobId, Job>>,
}

impl PriorityQueue {
    pub fn new(capacity: usize, clock: std::sync::Arc<dyn Clock>, jobs: Arc<DashMap<JobId, Job>>) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                ready: BinaryHeap::new(),
                delayed: BinaryHeap::new(),
            }),
            notify: tokio::sync::Notify::new(),
            clock,
            jobs,
        }
    }

    /// Count of jobs currently held (ready + delayed).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a job. Fails with `QueueFull` if the total count would exceed
    /// capacity. Wakes at most one waiting dequeuer (more, if the new item's
    /// eligibility is earlier than what a sleeping dequeuer was waiting on —
    /// `notify_waiters` re-arms every blocked dequeue loop cheaply since they
    /// just re-check state).
    pub fn enqueue(&self, item: QueueItem) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.len() >= self.capacity {
            return Err(SchedulerError::QueueFull {
                capacity: self.capacity,
            });
        }
        let now = self.clock.now();
        if item.eligible_at <= now {
            inner.ready.push(ReadyEntry(item));
        } else {
            inner.delayed.push(DelayedEntry(item));
        }
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Remove a specific job from the queue regardless of its current
    /// eligibility bucket, used when a `Pending`/`Queued` job is cancelled.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.len();
        inner.ready.retain(|e| e.0.id != id);
        inner.delayed.retain(|e| e.0.id != id);
        inner.len() != before
    }

    /// Block until a job becomes eligible and dequeue it, or until
    /// `cancel` fires, in which case `None` is returned. Never spuriously
    /// returns.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<JobId> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let wait_until = {
                let mut inner = self.inner.lock().unwrap();
                let now = self.clock.now();
                inner.promote_due(now, &self.jobs);

                if let Some(ReadyEntry(item)) = inner.ready.pop() {
                    return Some(item.id);
                }

                inner.delayed.peek().map(|d| d.0.eligible_at)
            };

            match wait_until {
                Some(at) => {
                    let now = self.clock.now();
                    let dur = (at - now).to_std().unwrap_or(std::time::Duration::ZERO);
                    // Cap the sleep so a ManualClock test's "now" (which
                    // advances out of band, not in wall-clock time) can't
                    // make us sleep the real thread for a long time.
                    let dur = dur.min(std::time::Duration::from_millis(50));
                    tokio::select! {
                        _ = tokio::time::sleep(dur) => {}
                        _ = self.notify.notified() => {}
                        _ = cancel.cancelled() => return None,
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = cancel.cancelled() => return None,
                    }
                }
            }
        }
    }

    /// Promote every delayed job whose eligibility has arrived right now,
    /// updating job statuses as `promote_due` does, then wake any blocked
    /// dequeuers. Exists so promotion isn't solely piggybacked on an idle
    /// worker calling `dequeue` — when every worker is busy, nothing would
    /// otherwise call `dequeue` to notice a delayed job becoming eligible.
    pub fn promote_due_now(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = self.clock.now();
        inner.promote_due(now, &self.jobs);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Block until the earliest delayed job becomes eligible, a new
    /// (possibly earlier-eligible) job is enqueued, or `cancel` fires.
    /// Performs no promotion or dequeue itself; pair with
    /// `promote_due_now` in a dedicated background task so delayed jobs
    /// are promoted to `Queued` on a schedule independent of whether any
    /// worker happens to be idle and dequeuing.
    pub async fn wait_for_next_promotion(&self, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }

        let wait_until = self.inner.lock().unwrap().delayed.peek().map(|d| d.0.eligible_at);
        match wait_until {
            Some(at) => {
                let now = self.clock.now();
                let dur = (at - now).to_std().unwrap_or(std::time::Duration::ZERO);
                let dur = dur.min(std::time::Duration::from_millis(50));
                tokio::select! {
                    _ = tokio::time::sleep(dur) => {}
                    _ = self.notify.notified() => {}
                    _ = cancel.cancelled() => {}
                }
            }
            None => {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }
    }
}
