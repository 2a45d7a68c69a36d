//! Module schema catalog.
//!
//! Each record module carries the vocabulary needed to turn user-facing
//! terms into API field names: aliases for the module itself, a term →
//! field mapping, display-column renames and the default column set.
//! The built-in catalog is embedded at compile time from `catalog.toml`.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const BUILTIN_CATALOG: &str = include_str!("catalog.toml");

/// The users module, target of identity lookups.
pub const USERS_MODULE: &str = "Users";

/// Allowed values for an enumerated field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnumValues {
    /// Plain list of stored values
    List(Vec<String>),
    /// Stored code → display label
    Labels(IndexMap<String, String>),
}

impl EnumValues {
    /// Display label for a stored value, if it is a known member.
    pub fn label_for<'a>(&'a self, value: &'a str) -> Option<&'a str> {
        match self {
            Self::List(values) => values.iter().find(|v| *v == value).map(String::as_str),
            Self::Labels(labels) => labels.get(value).map(String::as_str),
        }
    }
}

/// Schema of one record module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSchema {
    /// Canonical module name as the record API expects it.
    pub name: String,
    /// Alternative names users may type.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Field used for default sorting and date ranges.
    #[serde(default = "default_date_field")]
    pub date_field: String,
    /// Fields worth knowing about when describing the module.
    #[serde(default)]
    pub key_fields: Vec<String>,
    /// Display columns shown when the caller requests none.
    #[serde(default)]
    pub default_display_columns: Vec<String>,
    /// User term → API field.
    #[serde(default)]
    pub field_mapping: IndexMap<String, String>,
    /// Display column name → API field.
    #[serde(default)]
    pub column_renames: IndexMap<String, String>,
    /// Enumerated fields.
    #[serde(default)]
    pub enums: IndexMap<String, EnumValues>,
}

fn default_date_field() -> String {
    "date_entered".to_string()
}

/// Lower-case a term and replace spaces with underscores.
pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase().replace(' ', "_")
}

impl ModuleSchema {
    /// Minimal schema for a module the catalog does not know.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            date_field: default_date_field(),
            key_fields: Vec::new(),
            default_display_columns: Vec::new(),
            field_mapping: IndexMap::new(),
            column_renames: IndexMap::new(),
            enums: IndexMap::new(),
        }
    }

    /// Rewrite a user-facing term into an API field name.
    ///
    /// Tries the field mapping verbatim, then its normalised form, then a
    /// case-insensitive display-column match. Falls back to the normalised
    /// term itself.
    pub fn map_term(&self, term: &str) -> String {
        if let Some(field) = self.field_mapping.get(term) {
            return field.clone();
        }
        let normalized = normalize_term(term);
        if let Some(field) = self.field_mapping.get(&normalized) {
            return field.clone();
        }
        let lower = term.trim().to_lowercase();
        self.column_renames
            .iter()
            .find(|(display, _)| display.to_lowercase() == lower)
            .map(|(_, field)| field.clone())
            .unwrap_or(normalized)
    }

    /// API field behind a display column; unknown columns are normalised.
    pub fn column_field(&self, column: &str) -> String {
        self.column_renames
            .get(column)
            .cloned()
            .unwrap_or_else(|| normalize_term(column))
    }

    /// API fields behind the default display columns.
    pub fn default_fields(&self) -> Vec<String> {
        self.default_display_columns
            .iter()
            .map(|c| self.column_field(c))
            .collect()
    }

    /// Human label for an API field: the display column if one maps to it,
    /// otherwise the field in title case.
    pub fn field_label(&self, field: &str) -> String {
        self.column_renames
            .iter()
            .find(|(_, api)| *api == field)
            .map(|(display, _)| display.clone())
            .unwrap_or_else(|| title_case(field))
    }
}

fn title_case(field: &str) -> String {
    field
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    modules: Vec<ModuleSchema>,
}

/// Ordered set of module schemas.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    modules: IndexMap<String, ModuleSchema>,
}

impl Catalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_CATALOG)
    }

    /// Parse a catalog from `[[modules]]` TOML tables.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        if file.modules.is_empty() {
            return Err(Error::Configuration("catalog defines no modules".to_string()));
        }
        Ok(Self::from_modules(file.modules))
    }

    /// Build a catalog from schemas; later duplicates replace earlier ones.
    pub fn from_modules(modules: impl IntoIterator<Item = ModuleSchema>) -> Self {
        Self {
            modules: modules.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }

    /// Canonical module names in catalog order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    /// Schema for a canonical module name.
    pub fn schema(&self, module: &str) -> Option<&ModuleSchema> {
        self.modules.get(module)
    }

    /// Schema for a module, or a bare schema when unknown.
    pub fn schema_or_bare(&self, module: &str) -> ModuleSchema {
        self.schema(module)
            .cloned()
            .unwrap_or_else(|| ModuleSchema::bare(module))
    }

    /// Resolve a module name or alias, case-insensitively.
    ///
    /// Unknown names are returned unchanged.
    pub fn resolve_module(&self, name: &str) -> String {
        let lower = name.trim().to_lowercase();
        self.modules
            .values()
            .find(|m| {
                m.name.to_lowercase() == lower || m.aliases.iter().any(|a| a.to_lowercase() == lower)
            })
            .map(|m| m.name.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// Whether a canonical module name is known.
    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }
}
