//! Deep-link enrichment of display fields.

use crate::types::Record;
use serde_json::Value;

/// Display field, sibling id field, module the id belongs to.
///
/// `None` as module means the record's own module.
const LINK_FIELDS: &[(&str, &str, Option<&str>)] = &[
    ("name", "id", None),
    ("account_name", "account_id", Some("Accounts")),
    ("assigned_user_name", "assigned_user_id", Some("Users")),
];

/// URL of a module's list view.
pub fn module_url(ui_base: &str, module: &str) -> String {
    format!("{}/app/{module}", ui_base.trim_end_matches('/'))
}

/// URL of one record's detail view.
pub fn detail_url(ui_base: &str, module: &str, id: &str) -> String {
    format!("{}/app/detailview/{module}/{id}", ui_base.trim_end_matches('/'))
}

/// Markdown link with brackets in the label replaced by parentheses.
pub fn markdown_link(label: &str, url: &str) -> String {
    let label = label.replace('[', "(").replace(']', ")");
    format!("[{label}]({url})")
}

/// Rewrite display fields that have a sibling id into `[label](url)`.
pub fn enrich_links(record: &mut Record, ui_base: &str) {
    for &(display, id_field, target) in LINK_FIELDS {
        let (Some(label), Some(id)) = (non_empty_text(record, display), non_empty_text(record, id_field))
        else {
            continue;
        };
        let module = target.unwrap_or(record.module.as_str()).to_string();
        let url = detail_url(ui_base, &module, &id);
        record.set(display, Value::String(markdown_link(&label, &url)));
    }
}

fn non_empty_text(record: &Record, field: &str) -> Option<String> {
    record.text(field).filter(|t| !t.trim().is_empty())
}
