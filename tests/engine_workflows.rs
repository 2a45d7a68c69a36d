//! End-to-end engine workflows over the in-memory record API.
//!
//! These tests drive [`QueryEngine`] the way a chat front end would:
//!
//! - classification into several tasks run in parallel, rendered in order
//! - per-task failure isolation and renderer fallback
//! - person-name resolution and its multi-term fallback
//! - pagination continuation and cache-handle aggregation

use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use pretty_assertions::assert_eq;

use crm_query::cache::ManualClock;
use crm_query::classifier::{fallback_summary, ChatTurn, Classifier, RenderRequest, Renderer};
use crm_query::config::EngineConfig;
use crm_query::dispatcher::TaskOutcome;
use crm_query::engine::{AggregateOp, AggregateSource, NO_TASKS_MESSAGE, TASK_SEPARATOR};
use crm_query::fetch::FetchRequest;
use crm_query::identity::Continuation;
use crm_query::status::{CollectingReporter, NoopReporter, StatusReporter};
use crm_query::types::{ChartConfig, ChartType, FilterMap, FilterValue, Record, Task, TaskType};
use crm_query::upstream::memory::{Failure, InMemoryRecordApi};
use crm_query::{Error, QueryEngine, QueryRequest, Result};

// ---------------------------------------------------------------------------
// Collaborator stubs
// ---------------------------------------------------------------------------

/// Returns a fixed task list regardless of the text.
struct ScriptedClassifier(Vec<Task>);

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, _text: &str, _history: &[ChatTurn], _date_format: &str) -> Result<Vec<Task>> {
        Ok(self.0.clone())
    }
}

/// Always fails.
struct BrokenClassifier;

#[async_trait]
impl Classifier for BrokenClassifier {
    async fn classify(&self, _text: &str, _history: &[ChatTurn], _date_format: &str) -> Result<Vec<Task>> {
        Err(Error::Classification("oracle unavailable".to_string()))
    }
}

/// Renders `module: count`, or the error message.
struct EchoRenderer;

#[async_trait]
impl Renderer for EchoRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<String> {
        Ok(match request.outcome {
            TaskOutcome::Error(e) => e.message.clone(),
            other => format!("{}: {}", other.module(), other.count()),
        })
    }
}

/// Always fails.
struct BrokenRenderer;

#[async_trait]
impl Renderer for BrokenRenderer {
    async fn render(&self, _request: RenderRequest<'_>) -> Result<String> {
        Err(Error::InvalidTask("renderer offline".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn users() -> Vec<Record> {
    vec![
        Record::new("u-1", "Users")
            .with("name", "Priya Shah")
            .with("user_name", "pshah")
            .with("first_name", "Priya")
            .with("last_name", "Shah"),
        Record::new("u-2", "Users")
            .with("name", "Sam Lee")
            .with("user_name", "slee")
            .with("first_name", "Sam")
            .with("last_name", "Lee"),
    ]
}

fn cases() -> Vec<Record> {
    vec![
        Record::new("c1", "Cases")
            .with("assigned_to", "Priya Shah")
            .with("assigned_user_id", "u-1")
            .with("priority", "P1")
            .with("status", "Open"),
        Record::new("c2", "Cases")
            .with("assigned_to", "Sam Lee")
            .with("assigned_user_id", "u-2")
            .with("priority", "P2")
            .with("status", "Closed"),
        Record::new("c3", "Cases")
            .with("assigned_to", "Nobody")
            .with("assigned_user_id", "u-9")
            .with("priority", "P3")
            .with("status", "Open"),
    ]
}

fn leads() -> Vec<Record> {
    (1..=3)
        .map(|i| Record::new(format!("l{i}"), "Leads").with("status", "New"))
        .collect()
}

fn opportunities() -> Vec<Record> {
    vec![
        Record::new("o1", "Opportunities").with("amount", "1,200.50").with("sales_stage", "Won"),
        Record::new("o2", "Opportunities").with("amount", "₹800").with("sales_stage", "Lost"),
    ]
}

fn api() -> Arc<InMemoryRecordApi> {
    Arc::new(
        InMemoryRecordApi::new()
            .with_records("Users", users())
            .with_records("Cases", cases())
            .with_records("Leads", leads())
            .with_records("Opportunities", opportunities()),
    )
}

fn engine(api: Arc<InMemoryRecordApi>) -> QueryEngine {
    QueryEngine::builder(api)
        .config(EngineConfig::new("https://crm.test/api"))
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Multi-task runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_executes_tasks_in_parallel_and_keeps_order() {
    let engine = engine(api());
    let classifier = ScriptedClassifier(vec![
        Task::new(TaskType::Count, "leads"),
        Task::new(TaskType::Sum, "deals"),
    ]);
    let outer = Arc::new(CollectingReporter::new());

    let response = engine
        .run(
            &QueryRequest::new("how many leads, and total deal value?"),
            &classifier,
            &EchoRenderer,
            outer.clone(),
        )
        .await;

    assert_eq!(response.tasks.len(), 2);
    assert_eq!(response.tasks[0].module, "Leads");
    assert_eq!(response.tasks[1].module, "Opportunities");
    let expected = format!(
        "<!-- task_id: {} -->\nLeads: 3\n{TASK_SEPARATOR}<!-- task_id: {} -->\nOpportunities: 2\n",
        response.tasks[0].identity, response.tasks[1].identity
    );
    assert_eq!(response.content, expected);

    assert_eq!(response.messages[0], "Detected 2 requests. Executing in parallel...");
    assert_eq!(outer.messages(), response.messages);

    let TaskOutcome::Sum(sum) = &response.outcomes[1] else {
        panic!("expected sum outcome");
    };
    let summary = sum.summary.as_ref().unwrap();
    assert_eq!(summary.total, 2000.5);
    assert!(sum.message.contains("₹2,000.50"));
}

#[tokio::test]
async fn failing_task_does_not_affect_siblings() {
    let api = api();
    api.fail_with(Failure::Status(500), Some("Cases"));
    let engine = engine(api);
    let classifier = ScriptedClassifier(vec![
        Task::new(TaskType::List, "Cases"),
        Task::new(TaskType::Count, "Leads"),
    ]);

    let response = engine
        .run(&QueryRequest::new("cases and leads"), &classifier, &EchoRenderer, Arc::new(NoopReporter))
        .await;

    assert!(response.outcomes[0].is_error());
    assert_eq!(response.outcomes[1].count(), 3);
    assert!(response.content.contains("The CRM rejected the Cases query (HTTP 500)."));
    assert!(response.content.contains("Leads: 3"));
}

#[tokio::test]
async fn classifier_failure_yields_no_tasks() {
    let engine = engine(api());
    let response = engine
        .run(&QueryRequest::new("???"), &BrokenClassifier, &EchoRenderer, Arc::new(NoopReporter))
        .await;
    assert_eq!(response.content, NO_TASKS_MESSAGE);
    assert!(response.tasks.is_empty());
    assert!(response.outcomes.is_empty());

    let empty = engine
        .run(&QueryRequest::new("hello"), &ScriptedClassifier(Vec::new()), &EchoRenderer, Arc::new(NoopReporter))
        .await;
    assert_eq!(empty.content, NO_TASKS_MESSAGE);
}

#[tokio::test]
async fn renderer_failure_falls_back_to_summary() {
    let engine = engine(api());
    let classifier = ScriptedClassifier(vec![Task::new(TaskType::Count, "Leads")]);
    let response = engine
        .run(&QueryRequest::new("count leads"), &classifier, &BrokenRenderer, Arc::new(NoopReporter))
        .await;

    let summary = fallback_summary(&response.outcomes[0]);
    assert!(summary.contains("Total Count: **3**"));
    assert!(response.content.contains(&summary));
}

#[tokio::test]
async fn run_returns_first_chart() {
    let engine = engine(api());
    let chart = Task::new(TaskType::Chart, "Cases").with_chart(ChartConfig {
        x_col: Some("status".to_string()),
        y_col: None,
        chart_type: ChartType::Pie,
    });
    let classifier = ScriptedClassifier(vec![Task::new(TaskType::Count, "Leads"), chart]);

    let response = engine
        .run(&QueryRequest::new("chart cases by status"), &classifier, &EchoRenderer, Arc::new(NoopReporter))
        .await;

    let dataset = response.chart.expect("chart returned");
    assert_eq!(dataset.chart_type, ChartType::Pie);
    assert_eq!(dataset.points[0].label, "Open");
    assert_eq!(dataset.points[0].value, 2.0);
    assert_eq!(dataset.grand_total, 3.0);
}

// ---------------------------------------------------------------------------
// Filter resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn person_name_resolves_to_user_id() {
    let engine = engine(api());
    let mut filters = FilterMap::new();
    filters.insert("assigned_to", FilterValue::Unresolved("Priya Shah".to_string()));
    let task = Task::new(TaskType::List, "tickets").with_filters(filters);
    let reporter = CollectingReporter::new();

    let response = engine.execute_task(task, &Continuation::Start, &reporter).await;

    assert_eq!(response.task.filters.get("assigned_to"), None);
    assert_eq!(response.task.filters.get("assigned_user_id"), Some(&FilterValue::text("u-1")));
    assert_eq!(
        response.task.display_values.get("assigned_user_id").map(String::as_str),
        Some("Priya Shah")
    );
    let ids: Vec<&str> = response.outcome.records().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["c1"]);
    assert!(reporter.messages().contains(&"Resolved 'Priya Shah' to User ID.".to_string()));
}

#[tokio::test]
async fn unknown_full_name_falls_back_to_first_word() {
    let engine = engine(api());
    let mut filters = FilterMap::new();
    filters.insert("assigned_to", FilterValue::Unresolved("Nobody Known".to_string()));
    let task = Task::new(TaskType::List, "Cases").with_filters(filters);

    let response = engine.execute_task(task, &Continuation::Start, &NoopReporter).await;

    assert!(response.task.merge_fallback);
    let TaskOutcome::MultiList(multi) = &response.outcome else {
        panic!("expected multi-list outcome, got {:?}", response.outcome);
    };
    let labels: Vec<&str> = multi.sections.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["Nobody"]);
    assert_eq!(multi.records[0].id, "c3");
}

#[tokio::test]
async fn multi_value_list_gets_one_section_per_value() {
    let api = api();
    let engine = engine(api.clone());
    let task = Task::new(TaskType::List, "Cases")
        .with_filters(FilterMap::new().with("priority", FilterValue::list(["P1", "P2"])));
    let reporter = CollectingReporter::new();

    let response = engine.execute_task(task, &Continuation::Start, &reporter).await;

    let TaskOutcome::MultiList(multi) = &response.outcome else {
        panic!("expected multi-list outcome");
    };
    assert_eq!(multi.field, "priority");
    assert_eq!(multi.sections.len(), 2);
    assert_eq!(multi.count, 2);
    assert!(multi.sections.iter().all(|s| s.cache_handle.is_some()));
    assert_eq!(api.requests_for("Cases").len(), 2);
    assert_eq!(reporter.messages()[0], "Generating separate reports for: P1, P2...");
}

// ---------------------------------------------------------------------------
// Continuation and cache handles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn next_page_continues_same_query_only() {
    let engine = engine(api());
    let classifier = ScriptedClassifier(vec![Task::new(TaskType::List, "Leads")]);
    let first = engine
        .run(&QueryRequest::new("show leads"), &classifier, &EchoRenderer, Arc::new(NoopReporter))
        .await;
    let identity = first.tasks[0].identity.clone();

    let next = QueryRequest::new("next page").with_continuation(Continuation::Next {
        identity: identity.clone(),
        last_page: first.tasks[0].page,
    });
    let second = engine.run(&next, &classifier, &EchoRenderer, Arc::new(NoopReporter)).await;
    assert_eq!(second.tasks[0].identity, identity);
    assert_eq!(second.tasks[0].page, 2);

    let other = ScriptedClassifier(vec![Task::new(TaskType::List, "Cases")]);
    let switched = engine.run(&next, &other, &EchoRenderer, Arc::new(NoopReporter)).await;
    assert_eq!(switched.tasks[0].page, 1);
}

#[tokio::test]
async fn expired_handle_is_cache_miss() {
    let clock = Arc::new(ManualClock::default());
    let engine = QueryEngine::builder(api())
        .config(EngineConfig::new("https://crm.test/api"))
        .clock(clock.clone())
        .build()
        .unwrap();

    let result = engine.search(&FetchRequest::new("Leads"), &NoopReporter).await.unwrap();
    let handle = result.cache_handle.unwrap();
    let count = engine
        .fetch_aggregate(AggregateSource::Handle(handle.clone()), AggregateOp::Count)
        .await
        .unwrap();
    assert_eq!(count, crm_query::engine::AggregateResult::Count { count: 3 });

    clock.advance(TimeDelta::hours(2));
    let err = engine
        .fetch_aggregate(AggregateSource::Handle(handle), AggregateOp::Count)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CacheMiss { .. }));
}

#[test]
fn reporters_are_object_safe() {
    let reporter: Arc<dyn StatusReporter> = Arc::new(CollectingReporter::new());
    reporter.report("ok".to_string());
}
