//! Task identity and page continuation.
//!
//! A [`TaskIdentity`] names the logical query behind a task, so a follow-up
//! "next page" request can tell whether the user is still paging through
//! the same results or has asked something new. It is a continuation key
//! only and carries no authorization meaning.

use crate::types::{Condition, FilterMap, FilterValue, Scalar};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write as _};

/// Deterministic digest of a module and its filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskIdentity(String);

impl TaskIdentity {
    /// Identity of `module` queried with `filters`.
    ///
    /// Independent of filter key order at every nesting level and of how
    /// numbers were written (`100`, `100.0` and a numeric comparison operand
    /// given as text all hash alike).
    pub fn compute(module: &str, filters: &FilterMap) -> Self {
        let canonical = canonicalize(canonical_filters(filters));
        let digest = Sha256::digest(format!("{module}|{canonical}").as_bytes());
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest.iter() {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Wrap an identity received from a caller.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_filters(filters: &FilterMap) -> Value {
    Value::Object(
        filters
            .iter()
            .map(|(key, value)| {
                let json = match value {
                    FilterValue::Condition(Condition::Compare { op, value: Scalar::Text(text) }) => {
                        FilterValue::Condition(Condition::Compare {
                            op: *op,
                            value: Scalar::from_text(text),
                        })
                        .to_json()
                    },
                    other => other.to_json(),
                };
                (key.clone(), json)
            })
            .collect(),
    )
}

/// Integral floats within the exactly representable range become integers.
fn canonical_number(n: Number) -> Number {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < EXACT => Number::from(f as i64),
        _ => n,
    }
}

/// Rebuild a JSON value with object keys sorted and numbers normalized.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut entries: Vec<(String, Value)> = obj.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        },
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Number(n) => Value::Number(canonical_number(n)),
        other => other,
    }
}

/// Pagination state a request arrives with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Continuation {
    /// Fresh query
    #[default]
    Start,
    /// Explicit page with no prior query to compare against
    Page {
        /// Requested page
        page: u32,
    },
    /// "Next page" of a previous query
    Next {
        /// Identity of the previous query
        identity: TaskIdentity,
        /// Page the previous response showed
        last_page: u32,
    },
    /// A specific page of a previous query
    Resume {
        /// Identity of the previous query
        identity: TaskIdentity,
        /// Requested page
        page: u32,
    },
}

impl Continuation {
    /// Page to fetch for a task whose identity is `current`.
    ///
    /// A continuation naming a different identity restarts at page one.
    pub fn resolve_page(&self, current: &TaskIdentity) -> u32 {
        match self {
            Self::Start => 1,
            Self::Page { page } => (*page).max(1),
            Self::Next { identity, last_page } if identity == current => last_page.saturating_add(1).max(1),
            Self::Resume { identity, page } if identity == current => (*page).max(1),
            Self::Next { .. } | Self::Resume { .. } => 1,
        }
    }
}
