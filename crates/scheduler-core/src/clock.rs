//! Time and identity collaborators injected into the scheduler
//!
//! Kept as narrow traits, the way the teacher's job module takes a
//! `RedisPool` by constructor argument instead of reaching for a global —
//! here the collaborators are a clock and an id generator, so tests can
//! drive delayed/timeout scenarios deterministically.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// A monotonic-ish source of `now`, injectable for testing.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Default clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock a test can advance by hand, to exercise scheduled and timed-out
/// jobs without sleeping in real time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        self.millis.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }
}

/// Produces a string unique within the process lifetime.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Default generator: a v4 UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
