//! Filter values and filter maps.
//!
//! A [`FilterValue`] is decided once when the raw JSON filter is parsed, so
//! later stages (query translation, post-filtering, fan-out) match on the
//! variant instead of re-inspecting JSON shapes.

use chrono::{Datelike, Days, Months, NaiveDate};
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::fmt;

/// A literal filter operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Free text
    Text(String),
    /// Numeric literal
    Number(Number),
    /// Boolean literal
    Bool(bool),
}

impl Scalar {
    /// Parse a JSON leaf. Arrays, objects and null are not scalars.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::Bool(b) => Some(Self::Bool(*b)),
            _ => None,
        }
    }

    /// Parse free text, recognising numbers.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        trimmed
            .parse::<i64>()
            .ok()
            .map(Number::from)
            .or_else(|| trimmed.parse::<f64>().ok().and_then(Number::from_f64))
            .map(Self::Number)
            .unwrap_or_else(|| Self::Text(trimmed.to_string()))
    }

    /// JSON form of the scalar.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Number(n) => Value::Number(n.clone()),
            Self::Bool(b) => Value::Bool(*b),
        }
    }

    /// Numeric value, if the scalar is or parses as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Comparison operators understood by the record API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    /// Equality (substring for text)
    Eq,
    /// Inequality
    NotEq,
    /// Strictly greater
    Gt,
    /// Strictly less
    Lt,
    /// Greater or equal
    Ge,
    /// Less or equal
    Le,
}

impl Comparison {
    /// Parse an operator token such as `>=`, `greater_than` or `equals`.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "=" | "==" | "eq" | "equals" => Some(Self::Eq),
            "!=" | "<>" | "neq" | "not_equal" | "not_equals" => Some(Self::NotEq),
            ">" | "gt" | "greater_than" => Some(Self::Gt),
            "<" | "lt" | "less_than" => Some(Self::Lt),
            ">=" | "gte" | "greater_than_equals" => Some(Self::Ge),
            "<=" | "lte" | "less_than_equals" => Some(Self::Le),
            _ => None,
        }
    }

    /// Operator name in the record API's range-choice dialect.
    pub fn api_name(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "not_equal",
            Self::Gt => "greater_than",
            Self::Lt => "less_than",
            Self::Ge => "greater_than_equals",
            Self::Le => "less_than_equals",
        }
    }

    /// Canonical symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }

    /// Split a leading operator off text like `">= 100"`.
    pub fn split_prefix(text: &str) -> Option<(Self, &str)> {
        let text = text.trim_start();
        for (prefix, op) in [
            (">=", Self::Ge),
            ("<=", Self::Le),
            ("!=", Self::NotEq),
            (">", Self::Gt),
            ("<", Self::Lt),
        ] {
            if let Some(rest) = text.strip_prefix(prefix) {
                return Some((op, rest.trim()));
            }
        }
        None
    }
}

/// Named date ranges relative to today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelativeRange {
    Today,
    Yesterday,
    Tomorrow,
    ThisWeek,
    LastWeek,
    NextWeek,
    Last7Days,
    Next7Days,
    Last30Days,
    Next30Days,
    ThisMonth,
    LastMonth,
    NextMonth,
    ThisYear,
    LastYear,
    NextYear,
}

impl RelativeRange {
    /// Every named range.
    pub const ALL: [Self; 16] = [
        Self::Today,
        Self::Yesterday,
        Self::Tomorrow,
        Self::ThisWeek,
        Self::LastWeek,
        Self::NextWeek,
        Self::Last7Days,
        Self::Next7Days,
        Self::Last30Days,
        Self::Next30Days,
        Self::ThisMonth,
        Self::LastMonth,
        Self::NextMonth,
        Self::ThisYear,
        Self::LastYear,
        Self::NextYear,
    ];

    /// Operator name as sent to the record API.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::Tomorrow => "tomorrow",
            Self::ThisWeek => "this_week",
            Self::LastWeek => "last_week",
            Self::NextWeek => "next_week",
            Self::Last7Days => "last_7_days",
            Self::Next7Days => "next_7_days",
            Self::Last30Days => "last_30_days",
            Self::Next30Days => "next_30_days",
            Self::ThisMonth => "this_month",
            Self::LastMonth => "last_month",
            Self::NextMonth => "next_month",
            Self::ThisYear => "this_year",
            Self::LastYear => "last_year",
            Self::NextYear => "next_year",
        }
    }

    /// Parse an operator name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|r| r.as_str() == name)
    }

    /// Inclusive date bounds of the range relative to `today`.
    ///
    /// Weeks start on Monday.
    pub fn bounds(self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let day = |n: i64| shift_days(today, n);
        match self {
            Self::Today => Some((today, today)),
            Self::Yesterday => day(-1).map(|d| (d, d)),
            Self::Tomorrow => day(1).map(|d| (d, d)),
            Self::ThisWeek => week_of(today, 0),
            Self::LastWeek => week_of(today, -1),
            Self::NextWeek => week_of(today, 1),
            Self::Last7Days => Some((day(-7)?, today)),
            Self::Next7Days => Some((today, day(7)?)),
            Self::Last30Days => Some((day(-30)?, today)),
            Self::Next30Days => Some((today, day(30)?)),
            Self::ThisMonth => month_of(today, 0),
            Self::LastMonth => month_of(today, -1),
            Self::NextMonth => month_of(today, 1),
            Self::ThisYear => year_of(today.year()),
            Self::LastYear => year_of(today.year() - 1),
            Self::NextYear => year_of(today.year() + 1),
        }
    }
}

fn shift_days(date: NaiveDate, n: i64) -> Option<NaiveDate> {
    let days = Days::new(n.unsigned_abs());
    if n >= 0 {
        date.checked_add_days(days)
    } else {
        date.checked_sub_days(days)
    }
}

fn week_of(today: NaiveDate, offset_weeks: i64) -> Option<(NaiveDate, NaiveDate)> {
    let monday = shift_days(today, -i64::from(today.weekday().num_days_from_monday()))?;
    let start = shift_days(monday, offset_weeks * 7)?;
    Some((start, shift_days(start, 6)?))
}

fn month_of(today: NaiveDate, offset_months: i32) -> Option<(NaiveDate, NaiveDate)> {
    let first = today.with_day(1)?;
    let months = Months::new(offset_months.unsigned_abs());
    let start = if offset_months >= 0 {
        first.checked_add_months(months)?
    } else {
        first.checked_sub_months(months)?
    };
    let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((start, end))
}

fn year_of(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

/// Operator-object filter: comparisons, named ranges and explicit ranges.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field <op> value`
    Compare {
        /// Operator
        op: Comparison,
        /// Right-hand operand
        value: Scalar,
    },
    /// Named range relative to today
    Relative(RelativeRange),
    /// Inclusive explicit range
    Between {
        /// Lower bound
        start: String,
        /// Upper bound
        end: String,
    },
}

/// Value of one filter entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Literal match (substring for text)
    Scalar(Scalar),
    /// Any of several literals
    List(Vec<Scalar>),
    /// Operator object
    Condition(Condition),
    /// Human-readable name that still needs resolving to an identifier
    Unresolved(String),
}

impl FilterValue {
    /// Text filter shorthand.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Text(value.into()))
    }

    /// List filter from text values.
    pub fn list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(values.into_iter().map(|v| Scalar::Text(v.into())).collect())
    }

    /// Parse a raw JSON filter value.
    ///
    /// Returns `None` for values that constrain nothing (null, empty lists,
    /// operator objects missing their operand).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Array(items) => list_from(items),
            Value::Object(obj) => Self::from_object(obj),
            Value::String(s) => match Comparison::split_prefix(s) {
                Some((op, rest)) if !rest.is_empty() => Some(Self::Condition(Condition::Compare {
                    op,
                    value: Scalar::from_text(rest),
                })),
                _ => Some(Self::Scalar(Scalar::Text(s.clone()))),
            },
            other => Scalar::from_json(other).map(Self::Scalar),
        }
    }

    fn from_object(obj: &Map<String, Value>) -> Option<Self> {
        if let Some(Value::Array(items)) = obj.get("value") {
            return list_from(items);
        }
        let Some(operator) = obj.get("operator").and_then(Value::as_str) else {
            return obj.get("value").and_then(Self::from_json);
        };
        if let Some(range) = RelativeRange::parse(operator) {
            return Some(Self::Condition(Condition::Relative(range)));
        }
        if operator.eq_ignore_ascii_case("between") {
            let bound = |key: &str| obj.get(key).and_then(Scalar::from_json).map(|s| s.to_string());
            return Some(Self::Condition(Condition::Between {
                start: bound("start")?,
                end: bound("end")?,
            }));
        }
        let value = obj.get("value").and_then(Scalar::from_json)?;
        match Comparison::parse(operator) {
            Some(op) => Some(Self::Condition(Condition::Compare { op, value })),
            None => Some(Self::Scalar(value)),
        }
    }

    /// Canonical JSON form.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(s) => s.to_json(),
            Self::List(items) => Value::Array(items.iter().map(Scalar::to_json).collect()),
            Self::Condition(Condition::Compare { op, value }) => {
                serde_json::json!({ "operator": op.symbol(), "value": value.to_json() })
            },
            Self::Condition(Condition::Relative(range)) => {
                serde_json::json!({ "operator": range.as_str() })
            },
            Self::Condition(Condition::Between { start, end }) => {
                serde_json::json!({ "operator": "between", "start": start, "end": end })
            },
            Self::Unresolved(name) => Value::String(name.clone()),
        }
    }

    /// The list items, if this is a multi-value filter.
    pub fn as_list(&self) -> Option<&[Scalar]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

fn list_from(items: &[Value]) -> Option<FilterValue> {
    let scalars: Vec<Scalar> = items.iter().filter_map(Scalar::from_json).collect();
    (!scalars.is_empty()).then_some(FilterValue::List(scalars))
}

impl Serialize for FilterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilterValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::from_json(&raw).ok_or_else(|| D::Error::custom("filter value constrains nothing"))
    }
}

/// Ordered field → filter mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterMap {
    entries: IndexMap<String, FilterValue>,
}

impl FilterMap {
    /// Empty filter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object, dropping entries that constrain nothing.
    pub fn from_json(value: &Value) -> Self {
        let entries = value
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| FilterValue::from_json(v).map(|fv| (k.clone(), fv)))
                    .collect()
            })
            .unwrap_or_default();
        Self { entries }
    }

    /// JSON object form, in insertion order.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: FilterValue) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace an entry; a replaced key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: FilterValue) {
        self.entries.insert(key.into(), value);
    }

    /// Remove an entry, preserving the order of the rest.
    pub fn remove(&mut self, key: &str) -> Option<FilterValue> {
        self.entries.shift_remove(key)
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.entries.get(key)
    }

    /// Whether an entry exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.entries.iter()
    }

    /// Field names in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First field holding a list of values, with its values.
    pub fn multi_value_field(&self) -> Option<(&str, &[Scalar])> {
        self.entries
            .iter()
            .find_map(|(k, v)| v.as_list().map(|items| (k.as_str(), items)))
    }

    /// Copy of this map with one entry replaced.
    pub fn replacing(&self, key: &str, value: FilterValue) -> Self {
        let mut copy = self.clone();
        copy.insert(key, value);
        copy
    }

    /// Rewrite every key through `map`; later duplicates win.
    pub fn map_keys<F>(self, map: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        Self {
            entries: self
                .entries
                .into_iter()
                .map(|(k, v)| (map(&k), v))
                .collect(),
        }
    }

    /// Mark plain text values on the given fields as needing resolution.
    pub fn mark_unresolved(&mut self, fields: &[&str]) {
        for (key, value) in self.entries.iter_mut() {
            if !fields.contains(&key.as_str()) {
                continue;
            }
            if let FilterValue::Scalar(Scalar::Text(text)) = value {
                let name = std::mem::take(text);
                *value = FilterValue::Unresolved(name);
            }
        }
    }

    /// Whether any value still needs resolution.
    pub fn has_unresolved(&self) -> bool {
        self.entries
            .values()
            .any(|v| matches!(v, FilterValue::Unresolved(_)))
    }
}

impl FromIterator<(String, FilterValue)> for FilterMap {
    fn from_iter<T: IntoIterator<Item = (String, FilterValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Serialize for FilterMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilterMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(Self::from_json(&raw))
    }
}
