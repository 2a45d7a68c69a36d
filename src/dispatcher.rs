//! Workflow dispatch.
//!
//! Routes a resolved [`Task`] to the aggregation path for its type and
//! assembles a [`TaskOutcome`]. Every outcome shares the envelope fields
//! `type`, `module`, `count` and `records`.
//!
//! A fetch that matches nothing short-circuits: no aggregation runs and
//! nothing is cached.

use crate::aggregate::{self, format_count, ChartDataset, ChartSpec, SumSummary};
use crate::error::{Error, Result};
use crate::fanout::{merge_unique, MultiValueExecutor};
use crate::fetch::enrich::module_url;
use crate::fetch::{FetchRequest, RecordFetcher};
use crate::reconcile::{TotalCountReconciler, TotalSource};
use crate::status::StatusReporter;
use crate::types::{Record, Task, TaskType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Result of a list task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListOutcome {
    /// Module queried
    pub module: String,
    /// Records on this page
    pub count: usize,
    /// Total matching records
    pub total_count: usize,
    /// Where `total_count` came from
    #[serde(skip)]
    pub total_source: Option<TotalSource>,
    /// Page shown, 1-based
    pub page: u32,
    /// The records
    pub records: Vec<Record>,
    /// Link to the module list view
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crm_link: Option<String>,
    /// Handle of the cached records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_handle: Option<String>,
    /// Set when nothing matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One value's section of a multi-value list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSection {
    /// The value this section is filtered on
    pub label: String,
    /// Records in the section
    pub count: usize,
    /// The records
    pub records: Vec<Record>,
    /// Link to the module list view, for non-empty sections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crm_link: Option<String>,
    /// Handle of the cached section records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_handle: Option<String>,
}

/// Result of a list task whose filters held several values for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiListOutcome {
    /// Module queried
    pub module: String,
    /// Field the sections split on
    pub field: String,
    /// Distinct records across sections
    pub count: usize,
    /// Distinct records across sections, in section order
    pub records: Vec<Record>,
    /// One section per value, in value order
    pub sections: Vec<ListSection>,
}

/// Result of a sum task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumOutcome {
    /// Module queried
    pub module: String,
    /// Records matched
    pub count: usize,
    /// Sample of the matched records
    pub records: Vec<Record>,
    /// Totals; absent when nothing matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SumSummary>,
    /// Markdown summary
    pub message: String,
    /// Handle of the cached records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_handle: Option<String>,
}

/// Result of a count task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountOutcome {
    /// Module queried
    pub module: String,
    /// Records matched
    pub count: usize,
    /// Sample of the matched records
    pub records: Vec<Record>,
    /// Markdown summary
    pub message: String,
    /// Handle of the cached records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_handle: Option<String>,
}

/// Result of a chart task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartOutcome {
    /// Module queried
    pub module: String,
    /// Records matched
    pub count: usize,
    /// Sample of the matched records
    pub records: Vec<Record>,
    /// Grouped data; absent when nothing matched or grouping failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<ChartDataset>,
    /// Analysis text, or why there is no chart
    pub message: String,
    /// Handle of the cached records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_handle: Option<String>,
}

/// A task that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorOutcome {
    /// Module the task targeted
    pub module: String,
    /// Short explanation for the user
    pub message: String,
}

/// Uniform result of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Single table of records
    List(ListOutcome),
    /// One section per value of a multi-value filter
    MultiList(MultiListOutcome),
    /// Amount total
    Sum(SumOutcome),
    /// Cardinality
    Count(CountOutcome),
    /// Grouped chart data
    Chart(ChartOutcome),
    /// Failure isolated to this task
    Error(ErrorOutcome),
}

impl TaskOutcome {
    /// Module the task targeted.
    pub fn module(&self) -> &str {
        match self {
            Self::List(o) => &o.module,
            Self::MultiList(o) => &o.module,
            Self::Sum(o) => &o.module,
            Self::Count(o) => &o.module,
            Self::Chart(o) => &o.module,
            Self::Error(o) => &o.module,
        }
    }

    /// Envelope record count.
    pub fn count(&self) -> usize {
        match self {
            Self::List(o) => o.count,
            Self::MultiList(o) => o.count,
            Self::Sum(o) => o.count,
            Self::Count(o) => o.count,
            Self::Chart(o) => o.count,
            Self::Error(_) => 0,
        }
    }

    /// Envelope records.
    pub fn records(&self) -> &[Record] {
        match self {
            Self::List(o) => &o.records,
            Self::MultiList(o) => &o.records,
            Self::Sum(o) => &o.records,
            Self::Count(o) => &o.records,
            Self::Chart(o) => &o.records,
            Self::Error(_) => &[],
        }
    }

    /// Cache handle of the full record set, when one was written.
    pub fn cache_handle(&self) -> Option<&str> {
        match self {
            Self::List(o) => o.cache_handle.as_deref(),
            Self::Sum(o) => o.cache_handle.as_deref(),
            Self::Count(o) => o.cache_handle.as_deref(),
            Self::Chart(o) => o.cache_handle.as_deref(),
            Self::MultiList(_) | Self::Error(_) => None,
        }
    }

    /// Chart data, for chart outcomes that produced one.
    pub fn chart(&self) -> Option<&ChartDataset> {
        match self {
            Self::Chart(o) => o.dataset.as_ref(),
            _ => None,
        }
    }

    /// Whether the task failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Routes tasks to their aggregation path.
#[derive(Debug, Clone)]
pub struct WorkflowDispatcher {
    fetcher: Arc<RecordFetcher>,
    executor: MultiValueExecutor,
    reconciler: TotalCountReconciler,
}

impl WorkflowDispatcher {
    /// Dispatcher over `fetcher`, verifying totals at the configured threshold.
    pub fn new(fetcher: Arc<RecordFetcher>) -> Self {
        let reconciler = TotalCountReconciler::new(fetcher.config().count_verify_threshold);
        Self {
            executor: MultiValueExecutor::new(fetcher.clone()),
            fetcher,
            reconciler,
        }
    }

    /// Run one resolved task.
    ///
    /// Fetch failures are returned as errors; turning them into
    /// [`TaskOutcome::Error`] is the caller's decision.
    pub async fn dispatch(&self, task: &Task, reporter: &dyn StatusReporter) -> Result<TaskOutcome> {
        let module = self.fetcher.catalog().resolve_module(&task.module);
        info!(module = %module, task_type = %task.task_type, page = task.page, "dispatching task");
        match task.task_type {
            TaskType::List => self.list(task, &module, reporter).await,
            TaskType::Sum => self.sum(task, &module, reporter).await,
            TaskType::Count => self.count(task, &module, reporter).await,
            TaskType::Chart => self.chart(task, &module, reporter).await,
        }
    }

    fn crm_link(&self, module: &str) -> Option<String> {
        self.fetcher
            .config()
            .ui_base_url
            .as_deref()
            .map(|base| module_url(base, module))
    }

    fn sample(&self, records: &[Record]) -> Vec<Record> {
        records
            .iter()
            .take(self.fetcher.config().sample_size)
            .cloned()
            .collect()
    }

    /// Full page walk over every matching record, fanning out on lists.
    fn walk_request(&self, task: &Task, module: &str, fields: Vec<String>) -> FetchRequest {
        let budget = task.limit.unwrap_or(self.fetcher.config().aggregate_record_cap);
        FetchRequest::new(module)
            .with_filters(task.filters.clone())
            .fields(fields)
            .iterate(Some(budget))
    }

    async fn list(&self, task: &Task, module: &str, reporter: &dyn StatusReporter) -> Result<TaskOutcome> {
        let limit = task.limit.unwrap_or(self.fetcher.config().aggregate_record_cap);
        let request = FetchRequest::new(module)
            .with_filters(task.filters.clone())
            .fields(task.columns.clone())
            .limit(Some(limit))
            .page(task.page);

        if let Some((field, values)) = task.filters.multi_value_field() {
            let labels: Vec<String> = values.iter().map(ToString::to_string).collect();
            reporter.report(format!("Generating separate reports for: {}...", labels.join(", ")));
            let field = field.to_string();
            return self.multi_list(task, module, field, &request).await;
        }

        reporter.report(format!("Querying {module} (Page {})...", task.page));
        let result = self.fetcher.fetch(&request).await?;
        let crm_link = self.crm_link(module);
        if result.is_empty() {
            return Ok(TaskOutcome::List(ListOutcome {
                module: module.to_string(),
                count: 0,
                total_count: 0,
                total_source: None,
                page: task.page,
                records: Vec::new(),
                crm_link,
                cache_handle: None,
                message: Some("No records found.".to_string()),
            }));
        }

        let total = self
            .reconciler
            .reconcile(&self.fetcher, &request, &result, task.limit, reporter)
            .await;
        Ok(TaskOutcome::List(ListOutcome {
            module: module.to_string(),
            count: result.count,
            total_count: total.count,
            total_source: Some(total.source),
            page: task.page,
            records: result.records,
            crm_link,
            cache_handle: result.cache_handle,
            message: None,
        }))
    }

    async fn multi_list(&self, task: &Task, module: &str, field: String, request: &FetchRequest) -> Result<TaskOutcome> {
        let parts = self.executor.execute_each(request).await?.unwrap_or_default();
        let mut sections: Vec<ListSection> = parts
            .into_iter()
            .map(|part| {
                let count = part.result.count;
                ListSection {
                    label: part.value.to_string(),
                    count,
                    cache_handle: self.fetcher.cache().insert(part.result.records.clone()),
                    records: part.result.records,
                    crm_link: (count > 0).then(|| self.crm_link(module)).flatten(),
                }
            })
            .collect();

        if task.merge_fallback {
            let found: Vec<ListSection> = sections.iter().filter(|s| s.count > 0).cloned().collect();
            if found.is_empty() {
                sections.truncate(1);
            } else {
                sections = found;
            }
        }

        let records = merge_unique(sections.iter().map(|s| s.records.clone()));
        Ok(TaskOutcome::MultiList(MultiListOutcome {
            module: module.to_string(),
            field,
            count: records.len(),
            records,
            sections,
        }))
    }

    async fn sum(&self, task: &Task, module: &str, reporter: &dyn StatusReporter) -> Result<TaskOutcome> {
        reporter.report(format!("Querying {module}..."));
        let request = self.walk_request(task, module, vec![aggregate::AMOUNT_FIELD.to_string()]);
        let result = self.executor.execute(&request, reporter).await?;
        reporter.report(format!("Found {} records", format_count(result.count)));

        if result.is_empty() {
            return Ok(TaskOutcome::Sum(SumOutcome {
                module: module.to_string(),
                count: 0,
                records: Vec::new(),
                summary: None,
                message: format!("No records found for {module}."),
                cache_handle: None,
            }));
        }

        reporter.report("Calculating totals...".to_string());
        let summary = aggregate::sum_amount(&result.records);
        Ok(TaskOutcome::Sum(SumOutcome {
            module: module.to_string(),
            count: result.count,
            records: self.sample(&result.records),
            message: sum_message(&summary, result.count),
            summary: Some(summary),
            cache_handle: result.cache_handle,
        }))
    }

    async fn count(&self, task: &Task, module: &str, reporter: &dyn StatusReporter) -> Result<TaskOutcome> {
        reporter.report(format!("Counting {module}..."));
        let request = self.walk_request(task, module, Vec::new());
        let result = self.executor.execute(&request, reporter).await?;
        reporter.report(format!("Found {} records", format_count(result.count)));
        Ok(TaskOutcome::Count(CountOutcome {
            module: module.to_string(),
            count: result.count,
            records: self.sample(&result.records),
            message: format!("Total Count: **{}**", format_count(result.count)),
            cache_handle: result.cache_handle,
        }))
    }

    async fn chart(&self, task: &Task, module: &str, reporter: &dyn StatusReporter) -> Result<TaskOutcome> {
        reporter.report(format!("Querying {module}..."));
        let config = &task.chart_config;
        let fields = config
            .x_col
            .iter()
            .chain(config.y_col.iter())
            .cloned()
            .collect();
        let request = self.walk_request(task, module, fields);
        let result = self.executor.execute(&request, reporter).await?;

        if result.is_empty() {
            return Ok(TaskOutcome::Chart(ChartOutcome {
                module: module.to_string(),
                count: 0,
                records: Vec::new(),
                dataset: None,
                message: format!("No data found for {module}."),
                cache_handle: None,
            }));
        }
        reporter.report(format!("Found {} records", format_count(result.count)));

        let x = config.x_col.as_deref();
        reporter.report(format!("Generating chart by '{}'...", x.unwrap_or_default()));
        let spec = ChartSpec {
            x_field: x,
            y_field: config.y_col.as_deref(),
            chart_type: config.chart_type,
            max_categories: self.fetcher.config().chart_max_categories,
        };
        let schema = self.fetcher.catalog().schema(module);
        let (dataset, message) = match aggregate::build_chart(&result.records, &spec, schema) {
            Ok(dataset) => {
                let mut message = dataset.analysis.clone();
                if let Some(warning) = &dataset.warning {
                    message.push_str("\n\n");
                    message.push_str(warning);
                }
                (Some(dataset), message)
            },
            Err(Error::InvalidTask(reason)) => (None, format!("Chart error: {reason}")),
            Err(err) => (None, format!("Chart error: {}", err.user_message())),
        };
        Ok(TaskOutcome::Chart(ChartOutcome {
            module: module.to_string(),
            count: result.count,
            records: self.sample(&result.records),
            dataset,
            message,
            cache_handle: result.cache_handle,
        }))
    }
}

fn sum_message(summary: &SumSummary, count: usize) -> String {
    let mut lines = vec![
        "### Financial Summary".to_string(),
        String::new(),
        format!("### Total Amount: **{}**", summary.formatted_total),
        format!("**Total Records:** {}", format_count(count)),
    ];
    if summary.records_without_amount > 0 {
        lines.push(format!(
            "> **Note:** {} records were excluded from calculation (missing amount data).",
            summary.records_without_amount
        ));
    }
    lines.join("\n")
}
