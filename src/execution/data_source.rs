//! The data source seam: where rendered text actually runs.

use serde::{Deserialize, Serialize};

use super::fingerprint::DataSourceId;
use super::timeout::{Interrupted, QueryTimeout};
use crate::schema::{dropdown_options, DropdownOption};

pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            column_type: None,
        }
    }
}

/// Tabular payload returned by an executor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResultData {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl QueryResultData {
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        QueryResultData { columns, rows }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Rows as dropdown entries, for `query`-type parameters.
    pub fn dropdown_options(&self) -> Vec<DropdownOption> {
        dropdown_options(&self.column_names(), &self.rows)
    }
}

/// Executor failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The query itself failed; the message is shown to the caller.
    #[error("{0}")]
    Query(String),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl ExecutorError {
    pub fn query(message: impl Into<String>) -> Self {
        ExecutorError::Query(message.into())
    }
}

/// A database connection the coordinator can run queries against.
///
/// `execute` runs on a worker thread and should poll `timeout.check()`
/// between units of work so cancellation and time limits take effect.
pub trait DataSource: Send + Sync {
    fn id(&self) -> DataSourceId;

    fn name(&self) -> &str;

    fn paused(&self) -> bool {
        false
    }

    fn pause_reason(&self) -> Option<String> {
        None
    }

    /// Whether the executed text may carry a leading metadata comment.
    fn supports_annotation(&self) -> bool {
        false
    }

    /// Rewrite `query` to cap the number of returned rows. The default
    /// leaves the text alone.
    fn apply_auto_limit(&self, query: &str, apply: bool) -> String {
        let _ = apply;
        query.to_string()
    }

    fn execute(
        &self,
        query: &str,
        timeout: &QueryTimeout,
    ) -> Result<QueryResultData, ExecutorError>;
}
