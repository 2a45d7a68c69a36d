//! Query engine.
//!
//! [`QueryEngine`] owns the fetch pipeline and the result cache and exposes
//! the operations callers use:
//!
//! * [`execute_task`](QueryEngine::execute_task): resolve, identify and run
//!   one classified task
//! * [`run`](QueryEngine::run): classify a request, run every task
//!   concurrently and render the combined answer
//! * [`fetch_aggregate`](QueryEngine::fetch_aggregate): aggregate a cached
//!   or supplied record set
//! * [`search`](QueryEngine::search) and
//!   [`record_details`](QueryEngine::record_details): direct lookups
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use crm_query::engine::QueryEngine;
//! use crm_query::config::EngineConfig;
//! use crm_query::identity::Continuation;
//! use crm_query::status::NoopReporter;
//! use crm_query::types::{Task, TaskType};
//! use crm_query::upstream::InMemoryRecordApi;
//!
//! # async fn example() -> crm_query::Result<()> {
//! let engine = QueryEngine::builder(Arc::new(InMemoryRecordApi::new()))
//!     .config(EngineConfig::new("https://crm.example.com/api"))
//!     .build()?;
//! let response = engine
//!     .execute_task(Task::new(TaskType::Count, "Leads"), &Continuation::Start, &NoopReporter)
//!     .await;
//! println!("{} leads", response.outcome.count());
//! # Ok(())
//! # }
//! ```

use crate::aggregate::{self, ChartDataset, ChartSpec, SumSummary};
use crate::cache::{Clock, ResultCache, SystemClock};
use crate::catalog::{Catalog, ModuleSchema};
use crate::classifier::{fallback_summary, ChatTurn, Classifier, RenderRequest, Renderer};
use crate::config::EngineConfig;
use crate::dispatcher::{ErrorOutcome, TaskOutcome, WorkflowDispatcher};
use crate::error::{Error, Result};
use crate::fanout::MultiValueExecutor;
use crate::fetch::{FetchRequest, RecordFetcher, ALL_FIELDS};
use crate::identity::{Continuation, TaskIdentity};
use crate::resolver::{EntitySearch, FilterResolver};
use crate::status::{CollectingReporter, StatusReporter};
use crate::types::{ChartType, FilterMap, FilterValue, QueryResult, Record, Task};
use crate::upstream::RecordApi;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Content shown when classification yields no tasks.
pub const NO_TASKS_MESSAGE: &str = "Could not identify module from query and conversation history.";

/// Separator between the rendered sections of a multi-task answer.
pub const TASK_SEPARATOR: &str = "\n\n---\n\n";

/// Result of [`QueryEngine::execute_task`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResponse {
    /// Identity of the resolved task, for later continuation
    pub identity: TaskIdentity,
    /// Page that was fetched
    pub page: u32,
    /// Canonical module
    pub module: String,
    /// The task after filter resolution
    pub task: Task,
    /// What the task produced
    pub outcome: TaskOutcome,
}

/// Per-task bookkeeping returned by [`QueryEngine::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Identity to continue from
    pub identity: TaskIdentity,
    /// Canonical module
    pub module: String,
    /// Page shown
    pub page: u32,
}

/// A natural-language request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// What the user asked
    pub text: String,
    /// Conversation so far
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    /// Pagination state from a previous answer
    #[serde(default)]
    pub continuation: Continuation,
    /// How the user writes dates
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_date_format() -> String {
    "YYYY-MM-DD".to_string()
}

impl QueryRequest {
    /// Request with no history, starting fresh.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            history: Vec::new(),
            continuation: Continuation::Start,
            date_format: default_date_format(),
        }
    }

    /// Set the conversation history.
    #[must_use]
    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    /// Continue from a previous answer.
    #[must_use]
    pub fn with_continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = continuation;
        self
    }

    /// Set the user's date format.
    #[must_use]
    pub fn with_date_format(mut self, date_format: impl Into<String>) -> Self {
        self.date_format = date_format.into();
        self
    }
}

/// Result of [`QueryEngine::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResponse {
    /// Progress messages emitted while running
    pub messages: Vec<String>,
    /// Rendered answer, tasks in classification order
    pub content: String,
    /// One entry per task, in classification order
    pub tasks: Vec<TaskInfo>,
    /// First chart produced, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartDataset>,
    /// Raw outcomes, in classification order
    pub outcomes: Vec<TaskOutcome>,
}

/// Records an aggregation runs over.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateSource {
    /// A cache handle from an earlier fetch
    Handle(String),
    /// Records supplied by the caller
    Records(Vec<Record>),
}

/// Aggregation to run.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOp {
    /// Sum a numeric field
    Sum {
        /// Field to sum
        field: String,
    },
    /// Count records
    Count,
    /// Group for a chart
    Chart {
        /// Grouping field
        x_field: String,
        /// Field summed per group; counts when absent
        y_field: Option<String>,
        /// Chart kind
        chart_type: ChartType,
    },
}

/// Result of [`QueryEngine::fetch_aggregate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregateResult {
    /// Field total
    Sum(SumSummary),
    /// Record count
    Count {
        /// Number of records
        count: usize,
    },
    /// Chart dataset
    Chart(ChartDataset),
}

/// Builder for [`QueryEngine`].
pub struct QueryEngineBuilder {
    api: Arc<dyn RecordApi>,
    config: EngineConfig,
    catalog: Option<Arc<Catalog>>,
    cache: Option<Arc<ResultCache>>,
    clock: Option<Arc<dyn Clock>>,
    entity_search: Option<Arc<dyn EntitySearch>>,
}

impl QueryEngineBuilder {
    /// Engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Module catalog; the built-in catalog by default.
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Shared result cache; a fresh one with the configured TTL by default.
    #[must_use]
    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Time source for relative dates and cache expiry.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Search used to resolve person names; the engine's own fetcher by default.
    #[must_use]
    pub fn entity_search(mut self, search: Arc<dyn EntitySearch>) -> Self {
        self.entity_search = Some(search);
        self
    }

    /// Validate the configuration and assemble the engine.
    pub fn build(self) -> Result<QueryEngine> {
        self.config.validate()?;
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => Arc::new(Catalog::builtin()?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ResultCache::new(self.config.cache_ttl()).with_clock(clock.clone())));
        let fetcher = Arc::new(
            RecordFetcher::new(self.api, cache, catalog, Arc::new(self.config)).with_clock(clock),
        );
        let search = self
            .entity_search
            .unwrap_or_else(|| fetcher.clone() as Arc<dyn EntitySearch>);
        Ok(QueryEngine {
            resolver: FilterResolver::new(search),
            dispatcher: WorkflowDispatcher::new(fetcher.clone()),
            executor: MultiValueExecutor::new(fetcher.clone()),
            fetcher,
        })
    }
}

/// Orchestrates classified tasks against the record API.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    fetcher: Arc<RecordFetcher>,
    resolver: FilterResolver,
    dispatcher: WorkflowDispatcher,
    executor: MultiValueExecutor,
}

impl QueryEngine {
    /// Start building an engine over `api`.
    pub fn builder(api: Arc<dyn RecordApi>) -> QueryEngineBuilder {
        QueryEngineBuilder {
            api,
            config: EngineConfig::default(),
            catalog: None,
            cache: None,
            clock: None,
            entity_search: None,
        }
    }

    /// Engine talking to the HTTP record API described by `config`.
    #[cfg(feature = "http-client")]
    pub fn from_config(
        config: EngineConfig,
        credentials: Arc<dyn crate::auth::CredentialProvider>,
    ) -> Result<Self> {
        let api = crate::upstream::HttpRecordApi::from_config(&config, credentials)?;
        Self::builder(Arc::new(api)).config(config).build()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        self.fetcher.config()
    }

    /// Module catalog.
    pub fn catalog(&self) -> &Catalog {
        self.fetcher.catalog()
    }

    /// Result cache.
    pub fn cache(&self) -> &Arc<ResultCache> {
        self.fetcher.cache()
    }

    /// Canonical names of the known modules.
    pub fn list_modules(&self) -> Vec<&str> {
        self.catalog().module_names()
    }

    /// Schema of a module, by name or alias.
    pub fn module_schema(&self, module: &str) -> Option<&ModuleSchema> {
        let canonical = self.catalog().resolve_module(module);
        self.catalog().schema(&canonical)
    }

    /// Resolve, identify and run one task.
    ///
    /// Never fails: a failing fetch becomes a [`TaskOutcome::Error`].
    pub async fn execute_task(
        &self,
        mut task: Task,
        continuation: &Continuation,
        reporter: &dyn StatusReporter,
    ) -> TaskResponse {
        task.module = self.catalog().resolve_module(&task.module);
        self.resolver.resolve(&mut task, reporter).await;

        let identity = TaskIdentity::compute(&task.module, &task.filters);
        task.page = continuation.resolve_page(&identity);

        let outcome = match self.dispatcher.dispatch(&task, reporter).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(module = %task.module, error = %err, "task failed");
                TaskOutcome::Error(ErrorOutcome {
                    module: task.module.clone(),
                    message: err.user_message(),
                })
            },
        };
        TaskResponse {
            identity,
            page: task.page,
            module: task.module.clone(),
            task,
            outcome,
        }
    }

    /// Classify `request`, run every task concurrently and render the answer.
    ///
    /// Tasks fail independently. Sections are joined in classification
    /// order, each prefixed with a `<!-- task_id: ... -->` marker. A renderer
    /// failure falls back to a plain summary.
    pub async fn run(
        &self,
        request: &QueryRequest,
        classifier: &dyn Classifier,
        renderer: &dyn Renderer,
        reporter: Arc<dyn StatusReporter>,
    ) -> RunResponse {
        let collector = CollectingReporter::forwarding(reporter);
        let tasks = match classifier
            .classify(&request.text, &request.history, &request.date_format)
            .await
        {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "classification failed");
                Vec::new()
            },
        };
        info!(tasks = tasks.len(), "request classified");

        if tasks.is_empty() {
            return RunResponse {
                messages: collector.drain(),
                content: NO_TASKS_MESSAGE.to_string(),
                tasks: Vec::new(),
                chart: None,
                outcomes: Vec::new(),
            };
        }
        if tasks.len() > 1 {
            collector.report(format!("Detected {} requests. Executing in parallel...", tasks.len()));
        }

        let reporter = &collector;
        let runs = tasks.into_iter().map(move |task| async move {
            let response = self.execute_task(task, &request.continuation, reporter).await;
            reporter.report("Generating full response...".to_string());
            let rendered = match renderer
                .render(RenderRequest {
                    query: &request.text,
                    task: &response.task,
                    outcome: &response.outcome,
                    history: &request.history,
                })
                .await
            {
                Ok(text) => text.trim().to_string(),
                Err(err) => {
                    warn!(error = %err, "rendering failed, using summary");
                    fallback_summary(&response.outcome)
                },
            };
            let content = self.section(&response, &rendered);
            (response, content)
        });
        let results = join_all(runs).await;

        let mut sections = Vec::with_capacity(results.len());
        let mut infos = Vec::with_capacity(results.len());
        let mut outcomes = Vec::with_capacity(results.len());
        for (response, content) in results {
            sections.push(content);
            infos.push(TaskInfo {
                identity: response.identity,
                module: response.module,
                page: response.page,
            });
            outcomes.push(response.outcome);
        }
        let chart = outcomes.iter().find_map(TaskOutcome::chart).cloned();

        RunResponse {
            messages: collector.drain(),
            content: sections.join(TASK_SEPARATOR),
            tasks: infos,
            chart,
            outcomes,
        }
    }

    fn section(&self, response: &TaskResponse, rendered: &str) -> String {
        let threshold = self.config().sample_size;
        let mut content = format!("<!-- task_id: {} -->\n{rendered}\n", response.identity);
        match &response.outcome {
            TaskOutcome::List(list) if list.count >= threshold => {
                if let Some(link) = &list.crm_link {
                    content.push_str(&format!("\n<!-- [View in CRM]({link}) -->\n"));
                }
            },
            TaskOutcome::MultiList(multi) => {
                for section in multi.sections.iter().filter(|s| s.count >= threshold) {
                    if let Some(link) = &section.crm_link {
                        content.push_str(&format!("\n**[View {} in CRM]({link})**\n", section.label));
                    }
                }
            },
            _ => {},
        }
        content
    }

    /// Fetch records directly, fanning out over multi-value filters.
    pub async fn search(&self, request: &FetchRequest, reporter: &dyn StatusReporter) -> Result<QueryResult> {
        self.executor.execute(request, reporter).await
    }

    /// Aggregate a cached or supplied record set.
    ///
    /// An unknown or expired handle is [`Error::CacheMiss`].
    pub async fn fetch_aggregate(&self, source: AggregateSource, op: AggregateOp) -> Result<AggregateResult> {
        let records: Arc<Vec<Record>> = match source {
            AggregateSource::Handle(handle) => self
                .cache()
                .get(&handle)
                .ok_or(Error::CacheMiss { handle })?,
            AggregateSource::Records(records) => Arc::new(records),
        };
        match op {
            AggregateOp::Sum { field } => Ok(AggregateResult::Sum(aggregate::sum_field(&records, &field))),
            AggregateOp::Count => Ok(AggregateResult::Count { count: records.len() }),
            AggregateOp::Chart {
                x_field,
                y_field,
                chart_type,
            } => {
                let module = records.first().map(|r| r.module.clone()).unwrap_or_default();
                let spec = ChartSpec {
                    x_field: Some(&x_field),
                    y_field: y_field.as_deref(),
                    chart_type,
                    max_categories: self.config().chart_max_categories,
                };
                let dataset = aggregate::build_chart(&records, &spec, self.catalog().schema(&module))?;
                Ok(AggregateResult::Chart(dataset))
            },
        }
    }

    /// One record by id, with every field.
    pub async fn record_details(&self, module: &str, id: &str) -> Result<Option<Record>> {
        let request = FetchRequest::new(module)
            .with_filters(FilterMap::new().with("id", FilterValue::text(id)))
            .fields([ALL_FIELDS])
            .uncached();
        let result = self.fetcher.fetch(&request).await?;
        Ok(result.records.into_iter().find(|r| r.id == id))
    }
}
