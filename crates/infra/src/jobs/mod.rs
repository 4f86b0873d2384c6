//! Background job engine for task reminders and reports.
//!
//! ## Design
//!
//! - Jobs live in one [`JobStore`] split into buckets: waiting, delayed,
//!   active, completed and failed
//! - Every state change is a single compare-and-move on the store
//! - The [`Dispatcher`] promotes due delayed jobs; the [`WorkerPool`] claims
//!   waiting jobs in FIFO order of readiness
//! - Failed attempts retry with exponential backoff until attempts run out
//!
//! ## Components
//!
//! - [`JobQueue`]: scheduling, status, stats and removal
//! - [`JobEngine`]: spawns the dispatcher and workers, returns a shutdown handle
//! - [`HandlerRegistry`]: one [`JobHandler`] per [`JobKind`]

pub mod backoff;
pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod handlers;
pub mod queue;
pub mod store;
pub mod types;

pub use backoff::{BackoffPolicy, BackoffStrategy, RetryPolicy};
pub use dispatcher::Dispatcher;
pub use engine::{JobEngine, JobEngineHandle};
pub use executor::{ExecutorStats, JobOutcome, WorkerPool, WorkerPoolConfig};
pub use handlers::{HandlerError, HandlerRegistry, JobHandler, ReminderHandler, ReportHandler};
pub use queue::{JobQueue, QueueError};
pub use store::{InMemoryJobStore, JobStore, JobStoreError, RetentionPolicy};
pub use types::{
    Job, JobKind, JobState, JobStats, JobStatus, Payload, ScheduleOptions, ScheduledJob,
    Transition,
};
