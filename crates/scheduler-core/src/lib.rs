pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod worker;

pub use backoff::RetryBackoff;
pub use clock::{Clock, IdGenerator, ManualClock, SystemClock, UuidGenerator};
pub use config::{CleanupInterval, SchedulerConfig};
pub use error::{SchedulerError, SchedulerResult};
pub use events::{ChannelEventSink, Event, EventSink, NullEventSink};
pub use job::{Job, JobId, JobPriority, JobQuery, JobSpec, JobStatus};
pub use registry::{ExecutorOptions, ExecutorRegistry, FnExecutor, JobExecutor, ProgressHandle};
pub use scheduler::{Scheduler, SchedulerStats, WorkerStatsEntry};
pub use worker::WorkerStats;

/// Current version of the scheduler crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
