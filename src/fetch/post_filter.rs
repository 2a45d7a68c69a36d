//! Local re-application of filters to fetched records.
//!
//! The list endpoint only approximates some filters (lists are never sent,
//! text matching differs), so every fetched record is checked again here
//! against the raw field values, before link enrichment.
//!
//! Matching rules:
//!
//! * text scalar: case-insensitive substring
//! * numeric scalar: numeric equality, else exact text
//! * list: case-insensitive membership
//! * comparison: numeric, then date, then text ordering (`=` is substring)
//! * named range / between: date within the inclusive bounds
//!
//! A record that lacks a filtered field entirely is not judged on it.

use crate::types::{Comparison, Condition, FilterMap, FilterValue, Record, Scalar};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::cmp::Ordering;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Keep only records satisfying every filter.
pub fn retain_matching(records: &mut Vec<Record>, filters: &FilterMap, today: NaiveDate) {
    if filters.is_empty() {
        return;
    }
    records.retain(|r| matches_all(r, filters, today));
}

/// Whether a record satisfies every filter.
pub fn matches_all(record: &Record, filters: &FilterMap, today: NaiveDate) -> bool {
    filters.iter().all(|(field, filter)| {
        if !record.has(field) {
            return true;
        }
        let actual = record.text(field).unwrap_or_default();
        value_matches(&actual, filter, today)
    })
}

/// Whether one field value satisfies one filter.
pub fn value_matches(actual: &str, filter: &FilterValue, today: NaiveDate) -> bool {
    match filter {
        FilterValue::Scalar(scalar) => scalar_matches(actual, scalar),
        FilterValue::Unresolved(text) => contains_ci(actual, text),
        FilterValue::List(items) => {
            let actual = actual.trim().to_lowercase();
            items.iter().any(|item| item.to_string().trim().to_lowercase() == actual)
        },
        FilterValue::Condition(Condition::Compare { op, value }) => compare(actual, *op, value),
        FilterValue::Condition(Condition::Relative(range)) => {
            match (range.bounds(today), parse_date(actual)) {
                (Some((start, end)), Some((at, _))) => (start..=end).contains(&at.date()),
                _ => false,
            }
        },
        FilterValue::Condition(Condition::Between { start, end }) => between(actual, start, end),
    }
}

fn scalar_matches(actual: &str, scalar: &Scalar) -> bool {
    match scalar {
        Scalar::Text(text) => contains_ci(actual, text),
        Scalar::Number(n) => match (parse_number(actual), n.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => actual.trim() == n.to_string(),
        },
        Scalar::Bool(b) => is_truthy(actual) == *b,
    }
}

fn compare(actual: &str, op: Comparison, target: &Scalar) -> bool {
    if let (Some(a), Some(b)) = (parse_number(actual), target.as_f64()) {
        return apply(op, a.partial_cmp(&b));
    }
    let target_text = target.to_string();
    if let (Some((a, _)), Some((b, date_only))) = (parse_date(actual), parse_date(&target_text)) {
        let ord = if date_only {
            a.date().cmp(&b.date())
        } else {
            a.cmp(&b)
        };
        return apply(op, Some(ord));
    }
    let a = actual.trim().to_lowercase();
    let b = target_text.trim().to_lowercase();
    match op {
        Comparison::Eq => a.contains(&b),
        Comparison::NotEq => a != b,
        _ => apply(op, Some(a.cmp(&b))),
    }
}

fn between(actual: &str, start: &str, end: &str) -> bool {
    if let (Some((at, _)), Some((lo, _)), Some((hi, _))) =
        (parse_date(actual), parse_date(start), parse_date(end))
    {
        return (lo.date()..=hi.date()).contains(&at.date());
    }
    if let (Some(at), Some(lo), Some(hi)) = (parse_number(actual), parse_number(start), parse_number(end)) {
        return lo <= at && at <= hi;
    }
    let at = actual.trim().to_lowercase();
    start.trim().to_lowercase() <= at && at <= end.trim().to_lowercase()
}

fn apply(op: Comparison, ord: Option<Ordering>) -> bool {
    match (op, ord) {
        (Comparison::NotEq, ord) => ord != Some(Ordering::Equal),
        (_, None) => false,
        (Comparison::Eq, Some(o)) => o == Ordering::Equal,
        (Comparison::Gt, Some(o)) => o == Ordering::Greater,
        (Comparison::Lt, Some(o)) => o == Ordering::Less,
        (Comparison::Ge, Some(o)) => o != Ordering::Less,
        (Comparison::Le, Some(o)) => o != Ordering::Greater,
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn is_truthy(text: &str) -> bool {
    matches!(text.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parse a plain number, ignoring thousands separators.
pub(crate) fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse a date or date-time; the flag is set for date-only input.
pub(crate) fn parse_date(text: &str) -> Option<(NaiveDateTime, bool)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some((dt.naive_utc(), false));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some((dt, false));
        }
    }
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(text, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| (dt, true))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelativeRange;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 12).unwrap()
    }

    fn cmp(op: Comparison, value: Scalar) -> FilterValue {
        FilterValue::Condition(Condition::Compare { op, value })
    }

    #[test]
    fn test_text_is_case_insensitive_substring() {
        assert!(value_matches("Closed Won", &FilterValue::text("closed"), today()));
        assert!(!value_matches("Open", &FilterValue::text("closed"), today()));
    }

    #[test]
    fn test_list_is_membership() {
        let filter = FilterValue::list(["P1", "P2"]);
        assert!(value_matches("p2", &filter, today()));
        assert!(!value_matches("P3", &filter, today()));
        assert!(!value_matches("P1 urgent", &filter, today()));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(value_matches("1,500.00", &cmp(Comparison::Gt, Scalar::Number(1000.into())), today()));
        assert!(!value_matches("900", &cmp(Comparison::Ge, Scalar::Number(1000.into())), today()));
        assert!(value_matches("1000", &cmp(Comparison::Le, Scalar::Number(1000.into())), today()));
        assert!(value_matches("10", &cmp(Comparison::NotEq, Scalar::Number(11.into())), today()));
    }

    #[test]
    fn test_date_comparisons() {
        let after = cmp(Comparison::Gt, Scalar::Text("2025-01-31".to_string()));
        assert!(value_matches("2025-02-01 09:00:00", &after, today()));
        assert!(!value_matches("2025-01-31 23:59:00", &after, today()));

        let on_or_before = cmp(Comparison::Le, Scalar::Text("01/31/2025".to_string()));
        assert!(value_matches("2025-01-31 23:59:00", &on_or_before, today()));
    }

    #[test]
    fn test_eq_text_is_substring_and_neq_is_exact() {
        let eq = cmp(Comparison::Eq, Scalar::Text("won".to_string()));
        assert!(value_matches("Closed Won", &eq, today()));
        let neq = cmp(Comparison::NotEq, Scalar::Text("closed won".to_string()));
        assert!(!value_matches("Closed Won", &neq, today()));
        assert!(value_matches("Closed Lost", &neq, today()));
    }

    #[test]
    fn test_relative_range() {
        let this_week = FilterValue::Condition(Condition::Relative(RelativeRange::ThisWeek));
        assert!(value_matches("2025-03-10 08:00:00", &this_week, today()));
        assert!(value_matches("2025-03-16", &this_week, today()));
        assert!(!value_matches("2025-03-17", &this_week, today()));
        assert!(!value_matches("", &this_week, today()));
    }

    #[test]
    fn test_between() {
        let q1 = FilterValue::Condition(Condition::Between {
            start: "2025-01-01".to_string(),
            end: "2025-03-31".to_string(),
        });
        assert!(value_matches("2025-03-31 18:00:00", &q1, today()));
        assert!(!value_matches("2025-04-01", &q1, today()));
    }

    #[test]
    fn test_missing_field_not_judged() {
        let record = Record::new("1", "Cases").with("status", "New");
        let filters = FilterMap::new()
            .with("status", FilterValue::text("new"))
            .with("priority", FilterValue::text("P1"));
        assert!(matches_all(&record, &filters, today()));
    }

    #[test]
    fn test_retain_matching() {
        let mut records = vec![
            Record::new("1", "Cases").with("status", "New"),
            Record::new("2", "Cases").with("status", "Closed"),
            Record::new("3", "Cases").with("status", serde_json::Value::Null),
        ];
        let filters = FilterMap::new().with("status", FilterValue::text("new"));
        retain_matching(&mut records, &filters, today());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "1");
    }

    #[test]
    fn test_bool_scalar() {
        assert!(value_matches("1", &FilterValue::Scalar(Scalar::Bool(true)), today()));
        assert!(value_matches("0", &FilterValue::Scalar(Scalar::Bool(false)), today()));
    }
}
