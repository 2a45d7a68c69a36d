//! Records and query results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record returned by the record API.
///
/// `id` and `module` are always present; every other field is kept as the
/// upstream sent it, apart from link enrichment applied at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Provider-assigned identifier
    pub id: String,
    /// Module the record belongs to
    pub module: String,
    /// Remaining fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Record with no fields besides its id and module.
    pub fn new(id: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module: module.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Build from a raw JSON object; `None` when there is no usable id.
    pub fn from_json(module: &str, value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let id = match fields.shift_remove("id")? {
            Value::String(s) if !s.trim().is_empty() => s,
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        fields.shift_remove("module");
        Some(Self {
            id,
            module: module.to_string(),
            fields,
        })
    }

    /// Raw value of a field. `id` and `module` are addressable too.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::String(self.id.clone())),
            "module" => Some(Value::String(self.module.clone())),
            _ => self.fields.get(field).cloned(),
        }
    }

    /// Whether the record carries a field.
    pub fn has(&self, field: &str) -> bool {
        matches!(field, "id" | "module") || self.fields.contains_key(field)
    }

    /// Field rendered as text. Null and missing fields yield `None`.
    pub fn text(&self, field: &str) -> Option<String> {
        self.get(field).and_then(|v| value_text(&v))
    }

    /// Field text with any `[label](url)` link reduced to its label.
    pub fn plain_text(&self, field: &str) -> Option<String> {
        self.text(field).map(|t| strip_link(&t).to_string())
    }

    /// Set or replace a field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }
}

/// Display text of a JSON value; null yields `None`.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Reduce `[label](url)` to `label`; other text is returned unchanged.
pub fn strip_link(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with('[') || !trimmed.ends_with(')') {
        return text;
    }
    match trimmed.rfind("](") {
        Some(split) => &trimmed[1..split],
        None => text,
    }
}

/// Records produced by one logical fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Number of records in `records`, not total matches
    pub count: usize,
    /// The records
    pub records: Vec<Record>,
    /// Module queried
    pub module: String,
    /// Handle of the cached copy, when one was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_handle: Option<String>,
    /// Total reported by the upstream page metadata, when trusted
    #[serde(skip)]
    pub reported_total: Option<u64>,
}

impl QueryResult {
    /// Result with no records.
    pub fn empty(module: impl Into<String>) -> Self {
        Self::from_records(module, Vec::new())
    }

    /// Result over the given records, not cached.
    pub fn from_records(module: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            count: records.len(),
            records,
            module: module.into(),
            cache_handle: None,
            reported_total: None,
        }
    }

    /// Whether no records were returned.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_requires_id() {
        assert!(Record::from_json("Cases", json!({"name": "x"})).is_none());
        assert!(Record::from_json("Cases", json!({"id": ""})).is_none());
        assert!(Record::from_json("Cases", json!("scalar")).is_none());

        let rec = Record::from_json("Cases", json!({"id": 42, "name": "Printer"})).unwrap();
        assert_eq!(rec.id, "42");
        assert_eq!(rec.module, "Cases");
        assert_eq!(rec.text("name").as_deref(), Some("Printer"));
    }

    #[test]
    fn test_serialize_flattens_fields() {
        let rec = Record::new("a1", "Leads").with("status", "New");
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value, json!({"id": "a1", "module": "Leads", "status": "New"}));
    }

    #[test]
    fn test_text_variants() {
        let rec = Record::new("1", "Opportunities")
            .with("amount", 1200.5)
            .with("closed", Value::Null)
            .with("name", "[Acme (HQ)](https://crm/app/detailview/Accounts/1)");
        assert_eq!(rec.text("amount").as_deref(), Some("1200.5"));
        assert_eq!(rec.text("closed"), None);
        assert_eq!(rec.text("missing"), None);
        assert_eq!(rec.plain_text("name").as_deref(), Some("Acme (HQ)"));
        assert_eq!(rec.text("id").as_deref(), Some("1"));
    }

    #[test]
    fn test_strip_link_passthrough() {
        assert_eq!(strip_link("plain"), "plain");
        assert_eq!(strip_link("[not a link"), "[not a link");
        assert_eq!(strip_link("[A](u)"), "A");
    }
}
