//! Classified tasks.

use super::filter::FilterMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation path a task takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Table or list of records
    List,
    /// Numeric total over the amount field
    Sum,
    /// Cardinality only
    Count,
    /// Grouped dataset for a chart
    Chart,
}

impl TaskType {
    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Chart => "chart",
        }
    }

    /// Parse a type name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "list" => Some(Self::List),
            "sum" => Some(Self::Sum),
            "count" => Some(Self::Count),
            "chart" => Some(Self::Chart),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preferred presentation of list results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayFormat {
    /// Tabular
    #[default]
    Table,
    /// Numbered lines
    List,
}

/// Kind of chart requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Bar,
    Line,
    Scatter,
    Pie,
}

impl ChartType {
    /// Parse a chart type; unknown names become bar charts.
    pub fn parse_or_default(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "line" => Self::Line,
            "scatter" => Self::Scatter,
            "pie" | "donut" => Self::Pie,
            _ => Self::Bar,
        }
    }

    /// Whether slices represent shares of a whole.
    pub fn is_proportional(self) -> bool {
        matches!(self, Self::Pie)
    }
}

/// Axes and kind of a chart task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Categorical grouping field
    #[serde(default)]
    pub x_col: Option<String>,
    /// Numeric field summed per group; counts when absent
    #[serde(default)]
    pub y_col: Option<String>,
    /// Chart kind
    #[serde(default)]
    pub chart_type: ChartType,
}

/// One classified unit of user intent.
///
/// Only the filter resolver mutates a task (filters, `merge_fallback`,
/// `display_values`) and only before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Aggregation path
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Canonical module name
    pub module: String,
    /// API field → filter value
    #[serde(default)]
    pub filters: FilterMap,
    /// Requested display columns (API field names)
    #[serde(default)]
    pub columns: Vec<String>,
    /// Caller's record limit
    #[serde(default)]
    pub limit: Option<usize>,
    /// Requested page, 1-based
    #[serde(default = "default_page")]
    pub page: u32,
    /// List presentation
    #[serde(default)]
    pub display_format: DisplayFormat,
    /// Chart axes, for chart tasks
    #[serde(default)]
    pub chart_config: ChartConfig,
    /// Set when an unresolved name fell back to a multi-term search
    #[serde(default)]
    pub merge_fallback: bool,
    /// Resolved filter field → the text the user typed
    #[serde(default)]
    pub display_values: IndexMap<String, String>,
}

fn default_page() -> u32 {
    1
}

impl Task {
    /// Task with empty filters on page one.
    pub fn new(task_type: TaskType, module: impl Into<String>) -> Self {
        Self {
            task_type,
            module: module.into(),
            filters: FilterMap::new(),
            columns: Vec::new(),
            limit: None,
            page: default_page(),
            display_format: DisplayFormat::default(),
            chart_config: ChartConfig::default(),
            merge_fallback: false,
            display_values: IndexMap::new(),
        }
    }

    /// Replace the filters.
    #[must_use]
    pub fn with_filters(mut self, filters: FilterMap) -> Self {
        self.filters = filters;
        self
    }

    /// Set the record limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the requested columns.
    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the chart configuration.
    #[must_use]
    pub fn with_chart(mut self, chart_config: ChartConfig) -> Self {
        self.chart_config = chart_config;
        self
    }

    /// Set the requested page.
    #[must_use]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }
}
