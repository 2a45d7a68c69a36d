//! Record fetcher.
//!
//! Executes one logical query: translates it into list-page requests, walks
//! pages when asked to, re-applies every filter locally, enriches display
//! fields with deep links and caches the non-empty result.

pub mod enrich;
pub mod fields;
pub mod post_filter;

pub use fields::ALL_FIELDS;

use crate::cache::{Clock, ResultCache, SystemClock};
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::types::{FilterMap, QueryResult, Record};
use crate::upstream::{DateRange, ListQuery, RecordApi, SortSpec};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters of one logical fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Module name or alias
    pub module: String,
    /// Filters, pushed upstream where expressible and re-applied locally
    pub filters: FilterMap,
    /// Extra fields to select; [`ALL_FIELDS`] selects everything
    pub fields: Vec<String>,
    /// Record budget; shrinks the page size when below one page
    pub max_records: Option<usize>,
    /// Page to fetch when not iterating
    pub page: u32,
    /// Walk pages until the budget, end of data or the page cap
    pub iterate_pages: bool,
    /// Lower bound on the module date field
    pub start_date: Option<String>,
    /// Upper bound on the module date field; defaults to today
    pub end_date: Option<String>,
    /// Write non-empty results to the cache
    pub cache: bool,
}

impl FetchRequest {
    /// Single first-page fetch with no filters.
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            filters: FilterMap::new(),
            fields: Vec::new(),
            max_records: None,
            page: 1,
            iterate_pages: false,
            start_date: None,
            end_date: None,
            cache: true,
        }
    }

    /// Set the filters.
    #[must_use]
    pub fn with_filters(mut self, filters: FilterMap) -> Self {
        self.filters = filters;
        self
    }

    /// Fetch a specific page.
    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    /// Walk pages up to `max_records` (or the configured budget).
    #[must_use]
    pub fn iterate(mut self, max_records: Option<usize>) -> Self {
        self.iterate_pages = true;
        self.max_records = max_records;
        self
    }

    /// Cap the number of records.
    #[must_use]
    pub fn limit(mut self, max_records: Option<usize>) -> Self {
        self.max_records = max_records;
        self
    }

    /// Select additional fields.
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to a date range on the module date field.
    #[must_use]
    pub fn date_range(mut self, start: impl Into<String>, end: Option<String>) -> Self {
        self.start_date = Some(start.into());
        self.end_date = end;
        self
    }

    /// Do not cache the result.
    #[must_use]
    pub fn uncached(mut self) -> Self {
        self.cache = false;
        self
    }
}

/// Executes [`FetchRequest`]s against a [`RecordApi`].
pub struct RecordFetcher {
    api: Arc<dyn RecordApi>,
    cache: Arc<ResultCache>,
    catalog: Arc<Catalog>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl RecordFetcher {
    /// Fetcher over the given collaborators, on the system clock.
    pub fn new(
        api: Arc<dyn RecordApi>,
        cache: Arc<ResultCache>,
        catalog: Arc<Catalog>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            api,
            cache,
            catalog,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for relative dates.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Module catalog in use.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Engine configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Result cache in use.
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Clock in use.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run one logical fetch.
    ///
    /// Any page failure aborts the whole fetch.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<QueryResult> {
        let module = self.catalog.resolve_module(&request.module);
        let schema = self.catalog.schema_or_bare(&module);

        let mut page_size = self.config.page_size;
        if let Some(max) = request.max_records.filter(|m| *m > 0) {
            if max < page_size as usize {
                page_size = max as u32;
            }
        }
        let budget = if request.iterate_pages {
            request.max_records.unwrap_or(self.config.iteration_budget)
        } else {
            usize::MAX
        };
        let date_range = request.start_date.as_ref().map(|start| DateRange {
            field: schema.date_field.clone(),
            start: start.clone(),
            end: request
                .end_date
                .clone()
                .unwrap_or_else(|| self.clock.today().format("%m/%d/%Y").to_string()),
        });

        let mut query = ListQuery {
            module: module.clone(),
            page: if request.iterate_pages { 1 } else { request.page.max(1) },
            page_size,
            fields: fields::select_fields(&schema, &request.fields, &request.filters),
            filters: request.filters.clone(),
            sort: Some(SortSpec {
                field: schema.date_field.clone(),
                descending: true,
            }),
            date_range,
        };

        let mut records: Vec<Record> = Vec::new();
        let mut reported_total = None;
        let mut pages = 0u32;
        loop {
            let page = self.api.list_page(&query).await?;
            pages += 1;
            if pages == 1 {
                reported_total = page.reported_total;
            }
            let page_len = page.records.len();
            if page_len == 0 {
                break;
            }
            records.extend(page.records);
            if !request.iterate_pages {
                break;
            }
            if records.len() >= budget {
                records.truncate(budget);
                break;
            }
            if page_len < page_size as usize {
                break;
            }
            query.page += 1;
            if query.page > self.config.max_pages {
                warn!(module = %module, max_pages = self.config.max_pages, "page cap reached");
                break;
            }
        }
        debug!(module = %module, pages, fetched = records.len(), "pages walked");

        let before = records.len();
        post_filter::retain_matching(&mut records, &request.filters, self.clock.today());
        if records.len() < before {
            debug!(module = %module, removed = before - records.len(), "post-filter removed records");
        }

        if let Some(ui_base) = self.config.ui_base_url.as_deref() {
            for record in &mut records {
                enrich::enrich_links(record, ui_base);
            }
        }

        let cache_handle = if request.cache {
            self.cache.insert(records.clone())
        } else {
            None
        };
        info!(module = %module, count = records.len(), cached = cache_handle.is_some(), "fetch complete");

        Ok(QueryResult {
            count: records.len(),
            records,
            module,
            cache_handle,
            reported_total,
        })
    }
}

impl std::fmt::Debug for RecordFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
