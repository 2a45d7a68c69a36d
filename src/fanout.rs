//! Multi-value fan-out.
//!
//! The list endpoint has no OR semantics within a field, so a filter holding
//! several values is executed as one fetch per value, concurrently, and the
//! results merged.

use crate::error::Result;
use crate::fetch::{FetchRequest, RecordFetcher};
use crate::status::StatusReporter;
use crate::types::{FilterValue, QueryResult, Record, Scalar};
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Result of one per-value sub-fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueResult {
    /// The value the list filter was narrowed to
    pub value: Scalar,
    /// Records matching that value
    pub result: QueryResult,
}

/// Runs [`FetchRequest`]s, splitting multi-value filters into parallel
/// sub-fetches.
#[derive(Debug, Clone)]
pub struct MultiValueExecutor {
    fetcher: Arc<RecordFetcher>,
}

impl MultiValueExecutor {
    /// Executor over `fetcher`.
    pub fn new(fetcher: Arc<RecordFetcher>) -> Self {
        Self { fetcher }
    }

    /// The underlying fetcher.
    pub fn fetcher(&self) -> &Arc<RecordFetcher> {
        &self.fetcher
    }

    /// One request per value of the first list-valued filter, in list order.
    ///
    /// `None` when no filter holds a list.
    pub fn split(request: &FetchRequest) -> Option<(String, Vec<(Scalar, FetchRequest)>)> {
        let (field, values) = request.filters.multi_value_field()?;
        let field = field.to_string();
        let requests = values
            .iter()
            .map(|value| {
                let mut sub = request.clone();
                sub.filters = request
                    .filters
                    .replacing(&field, FilterValue::Scalar(value.clone()));
                sub.cache = false;
                (value.clone(), sub)
            })
            .collect();
        Some((field, requests))
    }

    /// Fetch once per value of the multi-value filter, keeping the results
    /// separate and in input order.
    ///
    /// `None` when no filter holds a list. Any sub-fetch failure fails the
    /// whole call.
    pub async fn execute_each(&self, request: &FetchRequest) -> Result<Option<Vec<ValueResult>>> {
        let Some((field, requests)) = Self::split(request) else {
            return Ok(None);
        };
        debug!(field = %field, values = requests.len(), "fanning out");
        let fetches = requests.iter().map(|(value, sub)| async move {
            let result = self.fetcher.fetch(sub).await?;
            Ok::<_, crate::error::Error>(ValueResult {
                value: value.clone(),
                result,
            })
        });
        Ok(Some(try_join_all(fetches).await?))
    }

    /// Fetch, fanning out over a multi-value filter when there is one.
    ///
    /// Merged records are the union of the per-value results, deduplicated
    /// by id, in the order of the input values. A non-empty merged result is
    /// cached when the request asks for caching.
    pub async fn execute(&self, request: &FetchRequest, reporter: &dyn StatusReporter) -> Result<QueryResult> {
        let Some((field, values)) = request.filters.multi_value_field() else {
            return self.fetcher.fetch(request).await;
        };
        reporter.report(format!(
            "Splitting query for {} values in '{field}'...",
            values.len()
        ));

        let module = self.fetcher.catalog().resolve_module(&request.module);
        let parts = self.execute_each(request).await?.unwrap_or_default();
        let records = merge_unique(parts.into_iter().map(|p| p.result.records));

        let cache_handle = if request.cache {
            self.fetcher.cache().insert(records.clone())
        } else {
            None
        };
        Ok(QueryResult {
            count: records.len(),
            records,
            module,
            cache_handle,
            reported_total: None,
        })
    }
}

/// Concatenate record sets, keeping the first occurrence of each id.
pub fn merge_unique<I>(sets: I) -> Vec<Record>
where
    I: IntoIterator<Item = Vec<Record>>,
{
    let mut seen = HashSet::new();
    sets.into_iter()
        .flatten()
        .filter(|r| seen.insert(r.id.clone()))
        .collect()
}
