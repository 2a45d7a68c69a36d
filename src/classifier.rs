//! Classifier and renderer collaborators.
//!
//! Turning free text into [`Task`]s and turning outcomes into prose are both
//! done by a text-completion oracle outside this crate. The engine depends
//! only on the [`Classifier`] and [`Renderer`] traits. Classifier output is
//! validated here: anything malformed becomes zero tasks, never a failure.

use crate::catalog::{Catalog, ModuleSchema};
use crate::dispatcher::TaskOutcome;
use crate::error::Result;
use crate::fetch::ALL_FIELDS;
use crate::resolver::RESOLVABLE_FIELDS;
use crate::types::{ChartConfig, ChartType, DisplayFormat, FilterMap, Task, TaskType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One earlier turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Speaker
    pub role: ChatRole,
    /// What was said
    pub content: String,
}

impl ChatTurn {
    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// An assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Turns a user request into tasks.
///
/// Zero tasks is a legitimate answer.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify `text` given the conversation so far.
    async fn classify(&self, text: &str, history: &[ChatTurn], date_format: &str) -> Result<Vec<Task>>;
}

/// Free-text completion oracle.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Complete `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// [`Classifier`] that asks a completion oracle for JSON tasks and validates
/// the answer against the catalog.
pub struct CompletionClassifier {
    oracle: Arc<dyn TextCompletion>,
    catalog: Arc<Catalog>,
}

impl CompletionClassifier {
    /// Classifier over `oracle`, validating against `catalog`.
    pub fn new(oracle: Arc<dyn TextCompletion>, catalog: Arc<Catalog>) -> Self {
        Self { oracle, catalog }
    }

    fn prompt(&self, text: &str, history: &[ChatTurn], date_format: &str) -> String {
        let mut prompt = String::from(
            "Classify the request into CRM query tasks. Answer with JSON only: \
             {\"tasks\": [{\"type\": \"list|sum|count|chart\", \"module\": \"...\", \
             \"filters\": {}, \"limit\": null, \"columns\": [], \"display_format\": \"table\", \
             \"chart_config\": {\"x_col\": null, \"y_col\": null, \"chart_type\": \"bar\"}}]}\n",
        );
        let _ = writeln!(prompt, "Modules: {}", self.catalog.module_names().join(", "));
        let _ = writeln!(prompt, "Dates are written as {date_format}.");
        for turn in history {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            let _ = writeln!(prompt, "{role}: {}", turn.content);
        }
        let _ = write!(prompt, "user: {text}");
        prompt
    }
}

impl std::fmt::Debug for CompletionClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClassifier").finish_non_exhaustive()
    }
}

#[async_trait]
impl Classifier for CompletionClassifier {
    async fn classify(&self, text: &str, history: &[ChatTurn], date_format: &str) -> Result<Vec<Task>> {
        let raw = self.oracle.complete(&self.prompt(text, history, date_format)).await?;
        Ok(parse_tasks(&raw, &self.catalog))
    }
}

/// Validate raw classifier output into tasks.
///
/// Accepts `{"tasks": [...]}`, a bare task object or a bare array, optionally
/// inside a ```` ```json ```` fence. Tasks naming an unknown module or type
/// are dropped; missing fields take their defaults. Filter keys, columns and
/// chart axes are rewritten to API field names, and person-name filters are
/// marked for resolution.
pub fn parse_tasks(raw: &str, catalog: &Catalog) -> Vec<Task> {
    let body = strip_fence(raw);
    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "classifier output is not JSON");
            return Vec::new();
        },
    };

    let items = match parsed {
        Value::Object(mut obj) => match obj.remove("tasks") {
            Some(Value::Array(items)) => items,
            Some(_) => Vec::new(),
            None if obj.contains_key("type") => vec![Value::Object(obj)],
            None => Vec::new(),
        },
        Value::Array(items) => items,
        _ => Vec::new(),
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| parse_task(obj, catalog))
        .collect()
}

fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn parse_task(obj: &Map<String, Value>, catalog: &Catalog) -> Option<Task> {
    let Some(task_type) = obj.get("type").and_then(Value::as_str).and_then(TaskType::parse) else {
        debug!("dropping task without a known type");
        return None;
    };
    let requested = obj.get("module").and_then(Value::as_str).unwrap_or_default();
    let module = catalog.resolve_module(requested);
    let Some(schema) = catalog.schema(&module) else {
        warn!(module = requested, "dropping task for unknown module");
        return None;
    };

    let mut filters = obj
        .get("filters")
        .map(FilterMap::from_json)
        .unwrap_or_default()
        .map_keys(|k| schema.map_term(k));
    let resolvable: Vec<&str> = RESOLVABLE_FIELDS.iter().map(|(source, _)| *source).collect();
    filters.mark_unresolved(&resolvable);

    let mut task = Task::new(task_type, module.clone()).with_filters(filters);
    task.columns = parse_columns(obj.get("columns"), schema);
    task.limit = obj.get("limit").and_then(parse_limit);
    task.display_format = match obj.get("display_format").and_then(Value::as_str) {
        Some(f) if f.eq_ignore_ascii_case("list") => DisplayFormat::List,
        _ => DisplayFormat::Table,
    };
    task.chart_config = parse_chart(obj.get("chart_config"), schema);
    Some(task)
}

fn parse_columns(value: Option<&Value>, schema: &ModuleSchema) -> Vec<String> {
    let columns: Vec<&str> = value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if columns == [ALL_FIELDS] {
        return vec![ALL_FIELDS.to_string()];
    }
    columns
        .into_iter()
        .filter(|c| !c.trim().is_empty() && *c != ALL_FIELDS)
        .map(|c| schema.map_term(c))
        .collect()
}

fn parse_limit(value: &Value) -> Option<usize> {
    let n = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    usize::try_from(n).ok().filter(|n| *n > 0)
}

fn parse_chart(value: Option<&Value>, schema: &ModuleSchema) -> ChartConfig {
    let Some(obj) = value.and_then(Value::as_object) else {
        return ChartConfig::default();
    };
    let axis = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| schema.map_term(s))
    };
    ChartConfig {
        x_col: axis("x_col"),
        y_col: axis("y_col"),
        chart_type: obj
            .get("chart_type")
            .and_then(Value::as_str)
            .map(ChartType::parse_or_default)
            .unwrap_or_default(),
    }
}

/// Everything a renderer sees for one task.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    /// The user's request text
    pub query: &'a str,
    /// The resolved task
    pub task: &'a Task,
    /// Its outcome
    pub outcome: &'a TaskOutcome,
    /// Conversation so far
    pub history: &'a [ChatTurn],
}

/// Turns one task outcome into user-facing markdown.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render `request`.
    async fn render(&self, request: RenderRequest<'_>) -> Result<String>;
}

/// Renderer producing the plain summary used when no oracle is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryRenderer;

#[async_trait]
impl Renderer for SummaryRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<String> {
        Ok(fallback_summary(request.outcome))
    }
}

/// Short markdown summary of an outcome.
pub fn fallback_summary(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Error(e) => format!("**Error:** {}", e.message),
        TaskOutcome::List(list) => match &list.message {
            Some(message) => format!("### {}\n{message}", list.module),
            None if list.total_count > list.count => format!(
                "### {}\nFound **{}** records. Displaying the latest **{}**.",
                list.module, list.total_count, list.count
            ),
            None => format!("### {}\nFound **{}** records.", list.module, list.count),
        },
        TaskOutcome::MultiList(multi) => multi
            .sections
            .iter()
            .map(|s| format!("### {} ({})\nFound **{}** records.", multi.module, s.label, s.count))
            .collect::<Vec<_>>()
            .join("\n\n"),
        TaskOutcome::Sum(sum) => sum.message.clone(),
        TaskOutcome::Count(count) => format!("### {}\n{}", count.module, count.message),
        TaskOutcome::Chart(chart) => format!("### {} Analysis\n{}", chart.module, chart.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{CountOutcome, ErrorOutcome};
    use crate::types::{FilterValue, Scalar};
    use pretty_assertions::assert_eq;

    fn catalog() -> Catalog {
        Catalog::builtin().unwrap()
    }

    #[test]
    fn test_parse_fenced_tasks() {
        let raw = r#"```json
        {"tasks": [
            {"type": "list", "module": "opportunities", "filters": {"Sales Stage": "Closed Won"}, "limit": "5"},
            {"type": "count", "module": "Leads"}
        ]}
        ```"#;
        let tasks = parse_tasks(raw, &catalog());
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].module, "Opportunities");
        assert_eq!(tasks[0].limit, Some(5));
        assert_eq!(tasks[0].filters.get("sales_stage"), Some(&FilterValue::text("Closed Won")));
        assert_eq!(tasks[1].task_type, TaskType::Count);
        assert_eq!(tasks[1].display_format, DisplayFormat::Table);
    }

    #[test]
    fn test_parse_single_object_and_marks_names() {
        let raw = r#"{"type": "list", "module": "Cases", "filters": {"assigned_to": "Priya"}}"#;
        let tasks = parse_tasks(raw, &catalog());
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].filters.has_unresolved());
    }

    #[test]
    fn test_malformed_output_is_zero_tasks() {
        let catalog = catalog();
        assert!(parse_tasks("Sorry, I can't help with that.", &catalog).is_empty());
        assert!(parse_tasks(r#"{"answer": 42}"#, &catalog).is_empty());
        assert!(parse_tasks(r#"{"tasks": "list"}"#, &catalog).is_empty());
        assert!(parse_tasks(r#"[{"type": "pivot", "module": "Cases"}]"#, &catalog).is_empty());
        assert!(parse_tasks(r#"[{"type": "list", "module": "Spaceships"}]"#, &catalog).is_empty());
    }

    #[test]
    fn test_chart_and_columns_mapping() {
        let raw = r#"{"type": "chart", "module": "Cases", "columns": ["__ALL__"],
                      "chart_config": {"x_col": "Status", "chart_type": "pie"}}"#;
        let task = parse_tasks(raw, &catalog()).remove(0);
        assert_eq!(task.columns, vec![ALL_FIELDS.to_string()]);
        assert_eq!(task.chart_config.chart_type, ChartType::Pie);
        assert_eq!(task.chart_config.x_col.as_deref(), Some("status"));
        assert_eq!(task.chart_config.y_col, None);
    }

    #[test]
    fn test_limit_rejects_non_positive() {
        assert_eq!(parse_limit(&Value::from(0)), None);
        assert_eq!(parse_limit(&Value::from(-3)), None);
        assert_eq!(parse_limit(&Value::from("12")), Some(12));
        assert_eq!(parse_limit(&Value::Null), None);
    }

    #[test]
    fn test_numeric_filters_survive() {
        let raw = r#"{"type": "sum", "module": "Opportunities", "filters": {"probability_c": 80}}"#;
        let task = parse_tasks(raw, &catalog()).remove(0);
        assert!(task
            .filters
            .iter()
            .any(|(_, v)| *v == FilterValue::Scalar(Scalar::Number(80.into()))));
    }

    #[test]
    fn test_fallback_summary() {
        let err = TaskOutcome::Error(ErrorOutcome {
            module: "Leads".to_string(),
            message: "Could not reach the CRM.".to_string(),
        });
        assert_eq!(fallback_summary(&err), "**Error:** Could not reach the CRM.");

        let count = TaskOutcome::Count(CountOutcome {
            module: "Leads".to_string(),
            count: 3,
            records: Vec::new(),
            message: "Total Count: **3**".to_string(),
            cache_handle: None,
        });
        assert_eq!(fallback_summary(&count), "### Leads\nTotal Count: **3**");
    }

    #[test]
    fn test_prompt_carries_history() {
        struct Echo;
        #[async_trait]
        impl TextCompletion for Echo {
            async fn complete(&self, prompt: &str) -> Result<String> {
                Ok(prompt.to_string())
            }
        }
        let classifier = CompletionClassifier::new(Arc::new(Echo), Arc::new(catalog()));
        let prompt = classifier.prompt("and for Leads?", &[ChatTurn::user("count cases")], "MM/DD/YYYY");
        assert!(prompt.contains("user: count cases"));
        assert!(prompt.contains("MM/DD/YYYY"));
        assert!(prompt.ends_with("user: and for Leads?"));
    }
}
