//! Total-count reconciliation.
//!
//! A list page shows at most one page of records, while the user usually
//! wants to know how many match in total. The upstream's own page metadata
//! is not reliable, so when a page looks full a separate id-only count walk
//! establishes the total.

use crate::fetch::{FetchRequest, RecordFetcher};
use crate::status::StatusReporter;
use crate::types::QueryResult;
use tracing::{debug, warn};

/// How the reconciled total was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalSource {
    /// Reported by the upstream page metadata
    Reported,
    /// Counted by a full id-only page walk
    Verified,
    /// The number of records on the page
    Visible,
}

/// Reconciled total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Total {
    /// Total matching records
    pub count: usize,
    /// Where the number came from
    pub source: TotalSource,
}

/// Decides the total number of matches behind a visible page.
#[derive(Debug, Clone, Copy)]
pub struct TotalCountReconciler {
    threshold: usize,
}

impl TotalCountReconciler {
    /// Reconciler that verifies once a page holds `threshold` records.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Whether a page of `fetched` records under `limit` warrants a count walk.
    pub fn should_verify(&self, fetched: usize, limit: Option<usize>) -> bool {
        fetched >= self.threshold && limit.is_none_or(|l| l > self.threshold)
    }

    /// Total matches for the query behind `visible`.
    ///
    /// `request` is the query that produced the page; the count walk reuses
    /// its module and filters. A failed walk falls back to the visible count.
    pub async fn reconcile(
        &self,
        fetcher: &RecordFetcher,
        request: &FetchRequest,
        visible: &QueryResult,
        limit: Option<usize>,
        reporter: &dyn StatusReporter,
    ) -> Total {
        if let Some(total) = visible.reported_total {
            return Total {
                count: usize::try_from(total).unwrap_or(usize::MAX),
                source: TotalSource::Reported,
            };
        }
        if !self.should_verify(visible.count, limit) {
            return visible_total(visible);
        }

        reporter.report("Verifying total count...".to_string());
        let count_request = FetchRequest::new(request.module.clone())
            .with_filters(request.filters.clone())
            .fields(["id"])
            .iterate(None)
            .uncached();
        match fetcher.fetch(&count_request).await {
            Ok(counted) => {
                debug!(module = %visible.module, total = counted.count, "verified total");
                Total {
                    count: counted.count.max(visible.count),
                    source: TotalSource::Verified,
                }
            },
            Err(err) => {
                warn!(module = %visible.module, error = %err, "background count failed");
                visible_total(visible)
            },
        }
    }
}

fn visible_total(visible: &QueryResult) -> Total {
    Total {
        count: visible.count,
        source: TotalSource::Visible,
    }
}
