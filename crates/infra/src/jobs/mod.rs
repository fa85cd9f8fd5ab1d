//! Background job processing: storage, activation, and the worker pool.
//!
//! ## Components
//!
//! - `Job`: a unit of work with queue, kind, payload, retry policy and lease
//! - `JobStorage`: claims due jobs and owns retry/dead-letter transitions
//! - `JobActivator`: turns a claimed job into work
//! - `JobFilter`: hooks around each execution
//! - `BackgroundProcess`: long-running work hosted next to the workers
//! - `ComponentResolver`: storage plus the server-wide components
//! - `BackgroundJobServer`: worker threads polling storage until disposed

pub mod activator;
pub mod components;
pub mod filter;
pub mod options;
pub mod process;
pub mod server;
pub mod store;
pub mod timezone;
pub mod types;

pub use activator::{
    FnActivator, HandlerActivator, JobActivator, JobContext, JobHandler, activator_fn,
};
pub use components::{ComponentResolver, JobComponents};
pub use filter::{FilterProvider, GlobalFilters, JobFilter};
pub use options::{
    ConfigurationError, DEFAULT_QUEUE_NAME, JobServerOptions, MAX_QUEUE_NAME_LEN,
    validate_queue_name,
};
pub use process::{BackgroundProcess, PeriodicProcess, ProcessContext};
pub use server::{BackgroundJobServer, DisposeReport, ServerError, ServerStats};
pub use store::{InMemoryJobStorage, JobStats, JobStorage, StorageError};
pub use timezone::{FixedOffsetResolver, TimeZoneResolver, UtcResolver};
pub use types::{
    BackoffStrategy, DeadLetterEntry, Job, JobAttemptRecord, JobKind, JobLease, JobOutcome,
    JobStatus, RetryPolicy,
};
