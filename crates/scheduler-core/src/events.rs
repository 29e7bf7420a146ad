//! Lifecycle event stream
//!
//! Every state transition a job goes through is mirrored onto an event
//! sink, the same pattern as the teacher's metrics module pushing status
//! counters on every transition, generalized here to a full event enum
//! plus a pluggable sink rather than a fixed Redis counter set.

use async_trait::async_trait;

use crate::job::Job;

#[derive(Debug, Clone)]
pub enum Event {
    Submitted(Job),
    Scheduled(Job),
    Started(Job),
    Retried(Job),
    Cancelled(Job),
    Completed(Job),
    Failed(Job),
}

impl Event {
    pub fn job(&self) -> &Job {
        match self {
            Event::Submitted(j)
            | Event::Scheduled(j)
            | Event::Started(j)
            | Event::Retried(j)
            | Event::Cancelled(j)
            | Event::Completed(j)
            | Event::Failed(j) => j,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Submitted(_) => "submitted",
            Event::Scheduled(_) => "scheduled",
            Event::Started(_) => "started",
            Event::Retried(_) => "retried",
            Event::Cancelled(_) => "cancelled",
            Event::Completed(_) => "completed",
            Event::Failed(_) => "failed",
        }
    }
}

/// Receives lifecycle events as they happen. Implementations must not
/// block the caller for long: the scheduler publishes from hot paths
/// (worker loops) and a slow sink would become a bottleneck.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: Event);
}

/// Delivers events over a bounded `tokio::sync::mpsc` channel. When the
/// channel is full the event is dropped and a warning is logged, rather
/// than applying backpressure to the scheduler.
pub struct ChannelEventSink {
    tx: tokio::sync::mpsc::Sender<Event>,
}

impl ChannelEventSink {
    /// Returns the sink plus the receiving half for the caller to consume.
    pub fn new(buffer: usize) -> (Self, tokio::sync::mpsc::Receiver<Event>) {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish(&self, event: Event) {
        if let Err(err) = self.tx.try_send(event) {
            match err {
                tokio::sync::mpsc::error::TrySendError::Full(event) => {
                    tracing::warn!(event = event.name(), "event channel full, dropping event");
                }
                tokio::sync::mpsc::error::TrySendError::Closed(_) => {
                    tracing::debug!("event channel closed, dropping event");
                }
            }
        }
    }
}

/// Discards every event. The default sink when a caller doesn't care about
/// the lifecycle stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, _event: Event) {}
}
