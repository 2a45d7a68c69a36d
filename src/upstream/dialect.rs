//! Query-parameter dialect of the list endpoint.
//!
//! | Filter | Parameters |
//! |---|---|
//! | scalar | `filter[k][eq]=v` |
//! | scalar on `created_by` | `filter[created_by][]=v` |
//! | comparison | `filter[range_k][eq]=v`, `filter[k_range_choice][operator]=op` |
//! | named range | `filter[range_k][operator]=name` |
//! | between | `filter[start_range_k][eq]`, `filter[end_range_k][eq]`, `filter[k_range_choice][operator]=between` |
//! | list | not sent |

use super::{FieldSelection, ListQuery};
use crate::types::{Condition, FilterValue};

/// Fields whose scalar filter uses the array form `filter[k][]`.
const ARRAY_FILTER_FIELDS: &[&str] = &["created_by"];

/// Query parameters for one list page, in a stable order.
pub fn list_params(query: &ListQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("page[number]".to_string(), query.page.to_string()),
        ("page[size]".to_string(), query.page_size.to_string()),
        ("filter[reset][eq]".to_string(), "true".to_string()),
    ];

    if let FieldSelection::Only(fields) = &query.fields {
        params.push((format!("fields[{}]", query.module), fields.join(",")));
    }

    if let Some(sort) = &query.sort {
        let (prefix, order) = if sort.descending { ("-", "desc") } else { ("", "asc") };
        params.push(("sort".to_string(), format!("{prefix}{}", sort.field)));
        params.push(("filter[sort_column][eq]".to_string(), sort.field.clone()));
        params.push(("filter[sort_order][eq]".to_string(), order.to_string()));
    }

    if let Some(range) = &query.date_range {
        let f = &range.field;
        params.push((format!("filter[start_range_{f}][eq]"), range.start.clone()));
        params.push((format!("filter[end_range_{f}][eq]"), range.end.clone()));
        params.push((format!("filter[{f}_range_choice]"), "between".to_string()));
    }

    for (key, value) in query.filters.iter() {
        params.extend(filter_params(key, value));
    }
    params
}

/// Parameters expressing one filter entry.
pub fn filter_params(key: &str, value: &FilterValue) -> Vec<(String, String)> {
    match value {
        FilterValue::List(_) => Vec::new(),
        FilterValue::Scalar(scalar) => scalar_param(key, scalar.to_string()),
        FilterValue::Unresolved(text) => scalar_param(key, text.clone()),
        FilterValue::Condition(Condition::Relative(range)) => {
            vec![(format!("filter[range_{key}][operator]"), range.as_str().to_string())]
        },
        FilterValue::Condition(Condition::Between { start, end }) => vec![
            (format!("filter[start_range_{key}][eq]"), start.clone()),
            (format!("filter[end_range_{key}][eq]"), end.clone()),
            (format!("filter[{key}_range_choice][operator]"), "between".to_string()),
        ],
        FilterValue::Condition(Condition::Compare { op, value }) => vec![
            (format!("filter[range_{key}][eq]"), value.to_string()),
            (format!("filter[{key}_range_choice][operator]"), op.api_name().to_string()),
        ],
    }
}

fn scalar_param(key: &str, value: String) -> Vec<(String, String)> {
    if ARRAY_FILTER_FIELDS.contains(&key) {
        vec![(format!("filter[{key}][]"), value)]
    } else {
        vec![(format!("filter[{key}][eq]"), value)]
    }
}
