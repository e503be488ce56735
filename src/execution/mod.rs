//! Query Execution Module
//!
//! Runs rendered queries against data sources with:
//! - Result caching keyed by query fingerprint
//! - At most one live job per fingerprint
//! - A priority-ordered worker pool
//! - Time limits and cancellation via cooperative checks
//!
//! [`ExecutionCoordinator`] is the entry point.

mod cache;
mod clock;
mod coordinator;
mod data_source;
mod dropdowns;
mod fingerprint;
mod job;
mod store;
mod timeout;
mod worker;

use std::time::Duration;

pub use cache::{CacheStats, CachedResult, MaxAge, ResultCache, ResultId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{
    ExecutionCoordinator, RunOptions, RunOutcome, ADHOC_PRIORITY, SCHEDULED_PRIORITY,
};
pub use data_source::{Column, DataSource, ExecutorError, QueryResultData, Row};
pub use dropdowns::CachedDropdowns;
pub use fingerprint::{normalize_query, query_hash, DataSourceId, Fingerprint};
pub use job::{Job, JobDescriptor, JobError, JobId, JobMetadata, JobState};
pub use store::{JobStore, MemoryJobStore};
pub use timeout::{CancelHandle, Interrupted, QueryTimeout};

/// Execution error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Retry later; no job was created
    #[error("{}", paused_message(.name, .reason.as_deref()))]
    DataSourcePaused {
        name: String,
        reason: Option<String>,
    },

    #[error("Missing parameter value for: {}", .names.join(", "))]
    MissingParameters { names: Vec<String> },

    #[error("Can't execute unsafe query with restricted access")]
    UnsafeQuery,

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Timed out after {timeout:?} waiting for job {id}")]
    WaitTimeout { id: JobId, timeout: Duration },

    #[error("Failed to start worker pool: {0}")]
    WorkerSpawn(String),

    #[error("Execution coordinator is shut down")]
    ShutDown,
}

fn paused_message(name: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("{name} is paused ({reason}). Please try later."),
        None => format!("{name} is paused. Please try later."),
    }
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;
