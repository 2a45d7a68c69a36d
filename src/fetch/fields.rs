//! Field selection for list requests.

use crate::catalog::ModuleSchema;
use crate::types::FilterMap;
use crate::upstream::FieldSelection;
use indexmap::IndexSet;

/// Marker in a requested field list that asks for every field.
pub const ALL_FIELDS: &str = "__ALL__";

/// `_name` fields that are not relations and have no `_id` sibling.
const NON_RELATIONAL_NAMES: &[&str] = &["first_name", "last_name", "full_name", "user_name"];

/// Minimal field set for a request.
///
/// Always includes `id` and `name`, the module's default display columns,
/// a description-like field, the requested fields and every filtered field.
/// Each relational `*_name` field pulls in its `*_id` sibling so links can
/// be built.
pub fn select_fields(schema: &ModuleSchema, requested: &[String], filters: &FilterMap) -> FieldSelection {
    if requested.iter().any(|f| f == ALL_FIELDS) {
        return FieldSelection::All;
    }

    let mut fields: IndexSet<String> = IndexSet::new();
    fields.insert("id".to_string());
    fields.insert("name".to_string());
    if schema.name == crate::catalog::USERS_MODULE {
        for f in ["user_name", "first_name", "last_name"] {
            fields.insert(f.to_string());
        }
    }
    fields.extend(schema.default_fields());
    fields.insert(if schema.name == "Accounts" {
        "company_research_c".to_string()
    } else {
        "description".to_string()
    });
    fields.extend(requested.iter().cloned());
    fields.extend(filters.keys().cloned());

    let siblings: Vec<String> = fields
        .iter()
        .filter_map(|f| relation_id_field(f))
        .collect();
    fields.extend(siblings);

    FieldSelection::Only(fields.into_iter().collect())
}

/// `account_name` → `account_id`; `None` for non-relational fields.
pub fn relation_id_field(field: &str) -> Option<String> {
    let base = field.strip_suffix("_name")?;
    if NON_RELATIONAL_NAMES.contains(&field) {
        return None;
    }
    let id = format!("{base}_id");
    (id != "user_id").then_some(id)
}
