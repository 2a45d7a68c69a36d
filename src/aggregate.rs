//! Aggregations over fetched records: amount totals and chart datasets.

use crate::catalog::ModuleSchema;
use crate::error::{Error, Result};
use crate::types::{ChartType, Record};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Field summed by sum tasks.
pub const AMOUNT_FIELD: &str = "amount";

/// Currency symbol used in formatted totals.
pub const CURRENCY_SYMBOL: &str = "₹";

/// Name of the y axis when groups are counted.
pub const COUNT_AXIS: &str = "Count";

/// Label of the bucket collecting truncated pie slices.
pub const OTHER_LABEL: &str = "Other";

/// Outcome of summing a numeric field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumSummary {
    /// Sum of usable values, rounded to cents
    pub total: f64,
    /// Total with currency symbol and thousands separators
    pub formatted_total: String,
    /// Records examined
    pub records_processed: usize,
    /// Records that contributed a non-zero value
    pub records_with_amount: usize,
    /// Records that were missing, zero or unparseable
    pub records_without_amount: usize,
}

/// Sum the amount field of `records`.
pub fn sum_amount(records: &[Record]) -> SumSummary {
    sum_field(records, AMOUNT_FIELD)
}

/// Sum `field` over `records`.
///
/// Values are cleaned of everything but digits, `.` and `-` before parsing.
/// Missing, blank, zero and unparseable values are excluded and counted in
/// `records_without_amount`.
pub fn sum_field(records: &[Record], field: &str) -> SumSummary {
    let mut total = 0.0;
    let mut with = 0;
    for record in records {
        match record.text(field).as_deref().and_then(clean_numeric) {
            Some(amount) if amount != 0.0 => {
                total += amount;
                with += 1;
            },
            _ => {},
        }
    }
    let total = (total * 100.0).round() / 100.0;
    SumSummary {
        total,
        formatted_total: format!("{CURRENCY_SYMBOL}{}", format_decimal(total)),
        records_processed: records.len(),
        records_with_amount: with,
        records_without_amount: records.len() - with,
    }
}

/// Parse a number after dropping every character but digits, `.` and `-`.
pub fn clean_numeric(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Two decimals with thousands separators: `1234567.891` → `1,234,567.89`.
pub fn format_decimal(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{}.{frac}", group_thousands(int_part))
}

/// Integer with thousands separators.
pub fn format_count(value: usize) -> String {
    group_thousands(&value.to_string())
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// One category of a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    /// Category label
    pub label: String,
    /// Aggregated value
    pub value: f64,
}

/// Grouped, sorted data for one chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDataset {
    /// Chart kind
    pub chart_type: ChartType,
    /// Grouping field
    pub x_field: String,
    /// Summed field, or [`COUNT_AXIS`]
    pub y_field: String,
    /// Categories, largest first, after truncation
    pub points: Vec<ChartPoint>,
    /// Sum over every category, including truncated ones
    pub grand_total: f64,
    /// Markdown summary of the extremes and the total
    pub analysis: String,
    /// Set when categories were truncated
    pub warning: Option<String>,
    /// Number of categories before truncation
    pub categories_total: usize,
}

/// Parameters of a chart grouping.
#[derive(Debug, Clone)]
pub struct ChartSpec<'a> {
    /// Grouping field
    pub x_field: Option<&'a str>,
    /// Field to sum per group; groups are counted when absent
    pub y_field: Option<&'a str>,
    /// Chart kind
    pub chart_type: ChartType,
    /// Maximum categories shown
    pub max_categories: usize,
}

/// Group `records` for a chart.
///
/// Link markup is stripped from labels and blank categories are dropped.
/// A y field no record carries falls back to counting.
pub fn build_chart(records: &[Record], spec: &ChartSpec<'_>, schema: Option<&ModuleSchema>) -> Result<ChartDataset> {
    if records.is_empty() {
        return Err(Error::InvalidTask("No records to plot".to_string()));
    }
    let x = spec
        .x_field
        .filter(|x| !x.trim().is_empty())
        .ok_or_else(|| Error::InvalidTask("No column specified for x-axis.".to_string()))?;
    if !records.iter().any(|r| r.has(x)) {
        return Err(Error::InvalidTask(format!("Column '{x}' not found in data.")));
    }

    let y = match spec.y_field {
        Some(y) if records.iter().any(|r| r.has(y)) => Some(y),
        Some(y) => {
            warn!(y_field = y, "y field not found, counting instead");
            None
        },
        None => None,
    };

    let mut groups: IndexMap<String, f64> = IndexMap::new();
    for record in records {
        let Some(label) = record.plain_text(x).map(|l| l.trim().to_string()) else {
            continue;
        };
        if label.is_empty() {
            continue;
        }
        let amount = match y {
            Some(y) => record.text(y).as_deref().and_then(clean_numeric).unwrap_or(0.0),
            None => 1.0,
        };
        *groups.entry(label).or_insert(0.0) += amount;
    }
    if groups.is_empty() {
        return Err(Error::InvalidTask(format!("All records have empty values for field '{x}'")));
    }

    let mut points: Vec<ChartPoint> = groups
        .into_iter()
        .map(|(label, value)| ChartPoint { label, value })
        .collect();
    points.sort_by(|a, b| b.value.total_cmp(&a.value));

    let x_display = label_for(schema, x);
    let y_field = y.map_or_else(|| COUNT_AXIS.to_string(), str::to_string);
    let y_display = match y {
        Some(y) => label_for(schema, y),
        None => COUNT_AXIS.to_string(),
    };
    let grand_total: f64 = points.iter().map(|p| p.value).sum();
    let categories_total = points.len();
    let analysis = analysis_text(&points, &x_display, &y_display, grand_total);

    let mut warning = None;
    if categories_total > spec.max_categories {
        warn!(categories = categories_total, limit = spec.max_categories, "truncating chart categories");
        warning = Some(format!(
            "**Note:** Display limit reached. Showing top {} of {categories_total} categories.",
            spec.max_categories
        ));
        let rest: f64 = points[spec.max_categories..].iter().map(|p| p.value).sum();
        points.truncate(spec.max_categories);
        if spec.chart_type.is_proportional() {
            points.push(ChartPoint {
                label: OTHER_LABEL.to_string(),
                value: rest,
            });
        }
    }

    Ok(ChartDataset {
        chart_type: spec.chart_type,
        x_field: x.to_string(),
        y_field,
        points,
        grand_total,
        analysis,
        warning,
        categories_total,
    })
}

fn label_for(schema: Option<&ModuleSchema>, field: &str) -> String {
    match schema {
        Some(schema) => schema.field_label(field),
        None => ModuleSchema::bare("").field_label(field),
    }
}

fn analysis_text(points: &[ChartPoint], x_display: &str, y_display: &str, total: f64) -> String {
    let mut text = format!("Analyzed **{}** groups/items.", points.len());
    if let (Some(top), Some(low)) = (points.first(), points.last()) {
        text.push_str(&format!(
            "\n- **Top ({x_display})**: {} ({})",
            top.label,
            format_decimal(top.value)
        ));
        if points.len() > 1 {
            text.push_str(&format!(
                "\n- **Lowest ({x_display})**: {} ({})",
                low.label,
                format_decimal(low.value)
            ));
        }
    }
    text.push_str(&format!("\n- **Total {y_display}**: {}", format_decimal(total)));
    text
}
