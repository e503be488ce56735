//! # QueryGate
//!
//! Parameterized query safety and execution coordination.
//!
//! ## Pipeline
//!
//! ```text
//! Template + Schema
//!     ↓
//! [ParameterizedQuery::apply]   → validated values, rendered text
//!     ↓
//! [Safety Analyzer]             → is_safe (structure preserved?)
//!     ↓
//! [ExecutionCoordinator]        → paused? missing? unsafe?
//!     ↓
//! [Result Cache]                → hit within max age → CachedResult
//!     ↓
//! [Dedupe table]                → live job for fingerprint → that Job
//!     ↓
//! [Worker Pool]                 → DataSource::execute → Done / Failed
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use querygate::{ParameterizedQuery, ParameterSchema, ParameterDefinition};
//!
//! let schema = ParameterSchema::new(vec![ParameterDefinition::text("userid")])?;
//! let mut query = ParameterizedQuery::new(
//!     "SELECT * FROM users WHERE userid={{userid}}",
//!     Some(schema),
//! );
//! query.apply([("userid".to_string(), "22".into())].into())?;
//! assert!(query.is_safe());
//!
//! let coordinator = ExecutionCoordinator::new(&Config::load()?)?;
//! match coordinator.run_query(&query, data_source, &RunOptions::default())? {
//!     RunOutcome::Cached(result) => { /* serve result.payload */ }
//!     RunOutcome::Job(job) => { /* poll coordinator.fetch(&job.id) */ }
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | Parameter value union |
//! | `template` | Mustache-style placeholders and sections |
//! | `schema` | Parameter definitions and validation |
//! | `safety` | Structural comparison of template and rendering |
//! | `query` | The parameterized query facade |
//! | `execution` | Cache, jobs, workers and the coordinator |
//! | `config` | Layered configuration |

pub mod config;
pub mod execution;
pub mod query;
pub mod safety;
pub mod schema;
pub mod template;
pub mod value;

pub use config::Config;
pub use execution::{
    CachedDropdowns, CachedResult, Clock, DataSource, ExecutionCoordinator, ExecutionError,
    ExecutionResult, ExecutorError, Fingerprint, JobDescriptor, JobId, JobState, JobStore,
    MaxAge, MemoryJobStore, QueryResultData, QueryTimeout, ResultCache, RunOptions, RunOutcome,
};
pub use query::ParameterizedQuery;
pub use schema::{
    DetachedQueryError, DropdownOption, DropdownResolver, ParameterDefinition, ParameterError,
    ParameterSchema, ParameterType,
};
pub use template::{collect_parameter_names, Template, TemplateError};
pub use value::{ParamValue, ParamValues};
