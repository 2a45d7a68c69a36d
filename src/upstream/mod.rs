//! Record API seam.
//!
//! [`RecordApi`] is the one capability the engine needs from the upstream
//! store: fetch one page of a module's list view. [`ListQuery`] describes the
//! page structurally; [`dialect`] turns it into the list endpoint's query
//! parameters and [`HttpRecordApi`] sends it over HTTP. [`InMemoryRecordApi`]
//! serves records held in process.

pub mod dialect;
#[cfg(feature = "http-client")]
mod http;
pub mod memory;

#[cfg(feature = "http-client")]
pub use http::HttpRecordApi;
pub use memory::InMemoryRecordApi;

use crate::error::Result;
use crate::types::{FilterMap, Record};
use async_trait::async_trait;

/// Which fields the upstream should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    /// Every field
    All,
    /// Only these fields, in order
    Only(Vec<String>),
}

/// Sort order of a list query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Field to sort by
    pub field: String,
    /// Newest/largest first
    pub descending: bool,
}

/// Inclusive range on a date field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    /// Date field the range applies to
    pub field: String,
    /// Lower bound as the user wrote it
    pub start: String,
    /// Upper bound as the user wrote it
    pub end: String,
}

/// One page request against a module's list view.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// Canonical module name
    pub module: String,
    /// 1-based page number
    pub page: u32,
    /// Records per page
    pub page_size: u32,
    /// Field selection
    pub fields: FieldSelection,
    /// Filters to push upstream (list values are never sent)
    pub filters: FilterMap,
    /// Sort order
    pub sort: Option<SortSpec>,
    /// Date range on the module date field
    pub date_range: Option<DateRange>,
}

/// One page of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Records on this page
    pub records: Vec<Record>,
    /// Total match count, when the upstream reports one the engine trusts
    pub reported_total: Option<u64>,
}

impl Page {
    /// Page without a reported total.
    pub fn of(records: Vec<Record>) -> Self {
        Self {
            records,
            reported_total: None,
        }
    }
}

/// Paginated list endpoint of the record store.
#[async_trait]
pub trait RecordApi: Send + Sync {
    /// Fetch one page.
    ///
    /// Transport and authorization failures are returned as errors; an
    /// empty page is not an error.
    async fn list_page(&self, query: &ListQuery) -> Result<Page>;
}
