//! In-memory [`RecordApi`].
//!
//! Serves records held in process, applying the subset of filters the real
//! list endpoint understands (everything except list values) and paginating
//! the same way. Every request is logged so callers can assert on the calls
//! the engine made.

use super::{ListQuery, Page, RecordApi};
use crate::cache::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::fetch::post_filter;
use crate::types::{FilterMap, FilterValue, Record};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Failure the store should simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Respond as if the token were rejected
    Unauthorized,
    /// Respond with an HTTP status
    Status(u16),
    /// Fail before any response
    Transport,
}

/// Record store held in memory.
pub struct InMemoryRecordApi {
    modules: RwLock<HashMap<String, Vec<Record>>>,
    requests: Mutex<Vec<ListQuery>>,
    failure: Mutex<Option<(Failure, Option<String>)>>,
    report_totals: bool,
    clock: Arc<dyn Clock>,
}

impl InMemoryRecordApi {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            report_totals: false,
            clock: Arc::new(SystemClock),
        }
    }

    /// Add records to a module.
    #[must_use]
    pub fn with_records(self, module: &str, records: impl IntoIterator<Item = Record>) -> Self {
        self.insert(module, records);
        self
    }

    /// Report the total match count on every page.
    #[must_use]
    pub fn with_reported_totals(mut self) -> Self {
        self.report_totals = true;
        self
    }

    /// Replace the clock used for relative-date filters.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Add records to a module.
    pub fn insert(&self, module: &str, records: impl IntoIterator<Item = Record>) {
        self.modules
            .write()
            .entry(module.to_string())
            .or_default()
            .extend(records);
    }

    /// Make subsequent requests fail, optionally only for one module.
    pub fn fail_with(&self, failure: Failure, module: Option<&str>) {
        *self.failure.lock() = Some((failure, module.map(str::to_string)));
    }

    /// Stop simulating failures.
    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ListQuery> {
        self.requests.lock().clone()
    }

    /// Requests received for one module.
    pub fn requests_for(&self, module: &str) -> Vec<ListQuery> {
        self.requests
            .lock()
            .iter()
            .filter(|q| q.module == module)
            .cloned()
            .collect()
    }

    fn check_failure(&self, module: &str) -> Result<()> {
        let failure = self.failure.lock().clone();
        match failure {
            Some((failure, scope)) if scope.as_deref().is_none_or(|m| m == module) => Err(match failure {
                Failure::Unauthorized => Error::unauthenticated(),
                Failure::Status(status) => Error::UpstreamStatus {
                    module: module.to_string(),
                    status,
                },
                Failure::Transport => Error::UpstreamTransport {
                    module: module.to_string(),
                    message: "connection refused".to_string(),
                },
            }),
            _ => Ok(()),
        }
    }
}

impl Default for InMemoryRecordApi {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRecordApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordApi")
            .field("modules", &self.modules.read().len())
            .field("requests", &self.requests.lock().len())
            .finish_non_exhaustive()
    }
}

/// Filters the list endpoint evaluates itself.
fn server_side(filters: &FilterMap) -> FilterMap {
    filters
        .iter()
        .filter(|(_, v)| !matches!(v, FilterValue::List(_)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[async_trait]
impl RecordApi for InMemoryRecordApi {
    async fn list_page(&self, query: &ListQuery) -> Result<Page> {
        self.requests.lock().push(query.clone());
        self.check_failure(&query.module)?;

        let filters = server_side(&query.filters);
        let today = self.clock.today();
        let matching: Vec<Record> = self
            .modules
            .read()
            .get(&query.module)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| post_filter::matches_all(r, &filters, today))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let size = query.page_size as usize;
        let start = (query.page.max(1) as usize - 1).saturating_mul(size);
        let records = matching.iter().skip(start).take(size).cloned().collect();
        Ok(Page {
            records,
            reported_total: self.report_totals.then_some(matching.len() as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::FieldSelection;

    fn query(page: u32, filters: FilterMap) -> ListQuery {
        ListQuery {
            module: "Cases".to_string(),
            page,
            page_size: 2,
            fields: FieldSelection::All,
            filters,
            sort: None,
            date_range: None,
        }
    }

    fn store() -> InMemoryRecordApi {
        InMemoryRecordApi::new().with_records(
            "Cases",
            (1..=5).map(|i| {
                Record::new(i.to_string(), "Cases").with("status", if i % 2 == 0 { "Closed" } else { "New" })
            }),
        )
    }

    #[tokio::test]
    async fn test_paginates() {
        let api = store();
        assert_eq!(api.list_page(&query(1, FilterMap::new())).await.unwrap().records.len(), 2);
        assert_eq!(api.list_page(&query(3, FilterMap::new())).await.unwrap().records.len(), 1);
        assert!(api.list_page(&query(4, FilterMap::new())).await.unwrap().records.is_empty());
        assert_eq!(api.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_ignores_list_filters() {
        let api = store();
        let filters = FilterMap::new().with("status", FilterValue::list(["Closed"]));
        let page = api.list_page(&query(1, filters)).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].id, "1");
    }

    #[tokio::test]
    async fn test_scoped_failure() {
        let api = store();
        api.fail_with(Failure::Status(503), Some("Leads"));
        assert!(api.list_page(&query(1, FilterMap::new())).await.is_ok());
        api.fail_with(Failure::Unauthorized, None);
        let err = api.list_page(&query(1, FilterMap::new())).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
        api.recover();
        assert!(api.list_page(&query(1, FilterMap::new())).await.is_ok());
    }
}
