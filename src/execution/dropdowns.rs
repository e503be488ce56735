//! Dropdown values read from cached query results.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::cache::{MaxAge, ResultCache};
use super::fingerprint::{DataSourceId, Fingerprint};
use crate::schema::{DetachedQueryError, DropdownOption, DropdownResolver, QueryId};

#[derive(Debug, Clone)]
struct DropdownQuery {
    data_source_id: Option<DataSourceId>,
    text: String,
}

/// Resolves `query`-type parameters from the latest cached result of the
/// referenced query, whatever its age.
#[derive(Debug)]
pub struct CachedDropdowns {
    cache: Arc<ResultCache>,
    queries: RwLock<HashMap<QueryId, DropdownQuery>>,
}

impl CachedDropdowns {
    pub fn new(cache: Arc<ResultCache>) -> Self {
        CachedDropdowns {
            cache,
            queries: RwLock::new(HashMap::new()),
        }
    }

    /// Make `query_id` resolvable. `data_source_id` is `None` for a query
    /// that has been detached from its data source.
    pub fn register(
        &self,
        query_id: QueryId,
        data_source_id: Option<DataSourceId>,
        text: impl Into<String>,
    ) {
        self.queries.write().insert(
            query_id,
            DropdownQuery {
                data_source_id,
                text: text.into(),
            },
        );
    }

    pub fn unregister(&self, query_id: QueryId) {
        self.queries.write().remove(&query_id);
    }
}

impl DropdownResolver for CachedDropdowns {
    fn resolve_dropdown_values(
        &self,
        query_id: QueryId,
    ) -> Result<Vec<DropdownOption>, DetachedQueryError> {
        let query = self
            .queries
            .read()
            .get(&query_id)
            .cloned()
            .ok_or(DetachedQueryError::UnknownQuery { query_id })?;
        let data_source_id = query
            .data_source_id
            .ok_or(DetachedQueryError::NoDataSource { query_id })?;

        let fingerprint = Fingerprint::new(data_source_id, &query.text);
        // Age is irrelevant with MaxAge::Any, so any timestamp works.
        let result = self
            .cache
            .get_latest(&fingerprint, MaxAge::Any, chrono::Utc::now())
            .ok_or(DetachedQueryError::NoCachedResult { query_id })?;

        Ok(result.payload.dropdown_options())
    }
}
