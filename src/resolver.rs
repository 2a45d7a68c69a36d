//! Filter resolution.
//!
//! Rewrites person-name filters (`assigned_to: "Priya Sharma"`) into stable
//! user identifiers by searching the Users module. Resolution never fails a
//! query: a name that cannot be matched degrades to a text search, and a
//! multi-word name degrades to a search on both the full text and its first
//! word (see [`ResolutionOutcome::Fallback`]).

use crate::catalog::USERS_MODULE;
use crate::error::Result;
use crate::fetch::{FetchRequest, RecordFetcher};
use crate::status::StatusReporter;
use crate::types::{FilterMap, FilterValue, QueryResult, Scalar, Task};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Filter keys holding a person's name, with the key the resolved id goes to.
pub const RESOLVABLE_FIELDS: &[(&str, &str)] = &[
    ("created_by_name", "created_by"),
    ("created_by_user", "created_by"),
    ("creator", "created_by"),
    ("assigned_user_name", "assigned_user_id"),
    ("assigned_user", "assigned_user_id"),
    ("assigned_to", "assigned_user_id"),
];

/// User fields searched, most specific first.
const SEARCH_FIELDS: &[&str] = &["name", "user_name", "first_name", "last_name"];

/// Fields selected on user lookups.
const USER_FIELDS: &[&str] = &["id", "name", "first_name", "last_name", "user_name"];

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}").ok());

/// Whether text already looks like a provider identifier.
pub fn looks_like_identifier(text: &str) -> bool {
    IDENTIFIER.as_ref().is_some_and(|re| re.is_match(text.trim()))
}

/// Key the resolved id of a resolvable field is written to.
pub fn resolution_target(field: &str) -> Option<&'static str> {
    RESOLVABLE_FIELDS
        .iter()
        .find(|(source, _)| *source == field)
        .map(|(_, target)| *target)
}

/// Search capability used to look entities up by field values.
#[async_trait]
pub trait EntitySearch: Send + Sync {
    /// Records of `module` matching `filters`, at most `limit` of them.
    async fn search(&self, module: &str, filters: FilterMap, limit: usize) -> Result<QueryResult>;
}

#[async_trait]
impl EntitySearch for RecordFetcher {
    async fn search(&self, module: &str, filters: FilterMap, limit: usize) -> Result<QueryResult> {
        let request = FetchRequest::new(module)
            .with_filters(filters)
            .limit(Some(limit))
            .fields(USER_FIELDS.iter().copied())
            .uncached();
        let mut result = self.fetch(&request).await?;
        result.records.truncate(limit);
        result.count = result.records.len();
        Ok(result)
    }
}

/// What happened to one resolvable filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The value was already an identifier and moved to the target key
    PassThrough {
        /// Original filter key
        field: String,
        /// Identifier
        id: String,
    },
    /// A user was found
    Resolved {
        /// Original filter key
        field: String,
        /// Key now holding the id
        target: String,
        /// Resolved identifier
        id: String,
        /// Text the user typed
        name: String,
    },
    /// No user matched a multi-word name; searching on both terms instead.
    ///
    /// The first word alone can match unrelated people. Callers prune empty
    /// sub-results via the task's `merge_fallback` flag.
    Fallback {
        /// Filter key
        field: String,
        /// Terms searched
        terms: Vec<String>,
    },
    /// No user matched; the text is kept as a substring search
    TextSearch {
        /// Filter key
        field: String,
        /// Text searched
        text: String,
    },
}

impl ResolutionOutcome {
    /// Whether resolution degraded to a text search.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Fallback { .. } | Self::TextSearch { .. })
    }
}

/// Resolves person-name filters on a task.
#[derive(Clone)]
pub struct FilterResolver {
    search: Arc<dyn EntitySearch>,
}

impl FilterResolver {
    /// Resolver searching through `search`.
    pub fn new(search: Arc<dyn EntitySearch>) -> Self {
        Self { search }
    }

    /// Rewrite every resolvable filter of `task` in place.
    ///
    /// Afterwards no filter value is left unresolved: each one is an
    /// identifier, a text search or a two-term list with
    /// `task.merge_fallback` set.
    pub async fn resolve(&self, task: &mut Task, reporter: &dyn StatusReporter) -> Vec<ResolutionOutcome> {
        let candidates: Vec<(String, String)> = task
            .filters
            .iter()
            .filter(|(key, _)| resolution_target(key).is_some())
            .filter_map(|(key, value)| match value {
                FilterValue::Unresolved(text) | FilterValue::Scalar(Scalar::Text(text)) => {
                    Some((key.clone(), text.clone()))
                },
                _ => None,
            })
            .collect();

        let mut outcomes = Vec::with_capacity(candidates.len());
        for (field, text) in candidates {
            let Some(target) = resolution_target(&field) else {
                continue;
            };
            outcomes.push(self.resolve_one(task, &field, target, &text, reporter).await);
        }

        settle_leftovers(&mut task.filters);
        outcomes
    }

    async fn resolve_one(
        &self,
        task: &mut Task,
        field: &str,
        target: &str,
        text: &str,
        reporter: &dyn StatusReporter,
    ) -> ResolutionOutcome {
        let name = text.trim().to_string();
        if name.is_empty() {
            task.filters.remove(field);
            return ResolutionOutcome::TextSearch {
                field: field.to_string(),
                text: name,
            };
        }
        if looks_like_identifier(&name) {
            task.filters.remove(field);
            task.filters.insert(target, FilterValue::text(name.clone()));
            return ResolutionOutcome::PassThrough {
                field: field.to_string(),
                id: name,
            };
        }

        reporter.report(format!("Resolving User ID for '{name}'..."));
        if let Some(id) = self.lookup(&name).await {
            debug!(field, target, id = %id, "resolved user filter");
            task.filters.remove(field);
            task.filters.insert(target, FilterValue::text(id.clone()));
            task.display_values.insert(target.to_string(), name.clone());
            reporter.report(format!("Resolved '{name}' to User ID."));
            return ResolutionOutcome::Resolved {
                field: field.to_string(),
                target: target.to_string(),
                id,
                name,
            };
        }

        match name.split_whitespace().next() {
            Some(first) if name.contains(' ') => {
                let first = first.to_string();
                warn!(field, name = %name, "user not resolved, searching full name and first word");
                reporter.report(format!(
                    "Could not resolve '{name}'. Searching for both '{name}' and '{first}'."
                ));
                task.filters
                    .insert(field, FilterValue::list([name.clone(), first.clone()]));
                task.merge_fallback = true;
                ResolutionOutcome::Fallback {
                    field: field.to_string(),
                    terms: vec![name, first],
                }
            },
            _ => {
                warn!(field, name = %name, "user not resolved, using text search");
                task.filters.insert(field, FilterValue::text(name.clone()));
                ResolutionOutcome::TextSearch {
                    field: field.to_string(),
                    text: name,
                }
            },
        }
    }

    /// First user id matching `name`, trying each search field then a
    /// first/last split.
    async fn lookup(&self, name: &str) -> Option<String> {
        for field in SEARCH_FIELDS {
            let filters = FilterMap::new().with(*field, FilterValue::text(name));
            if let Some(id) = self.first_id(filters).await {
                return Some(id);
            }
        }

        let mut parts = name.split_whitespace();
        let first = parts.next()?;
        let last = parts.collect::<Vec<_>>().join(" ");
        if last.is_empty() {
            return None;
        }
        let filters = FilterMap::new()
            .with("first_name", FilterValue::text(first))
            .with("last_name", FilterValue::text(last));
        self.first_id(filters).await
    }

    async fn first_id(&self, filters: FilterMap) -> Option<String> {
        match self.search.search(USERS_MODULE, filters, 1).await {
            Ok(result) => result.records.into_iter().next().map(|r| r.id),
            Err(err) => {
                warn!(error = %err, "user lookup failed");
                None
            },
        }
    }
}

impl std::fmt::Debug for FilterResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterResolver").finish_non_exhaustive()
    }
}

/// Turn any value still awaiting resolution into a plain text search.
fn settle_leftovers(filters: &mut FilterMap) {
    let pending: Vec<(String, String)> = filters
        .iter()
        .filter_map(|(k, v)| match v {
            FilterValue::Unresolved(text) => Some((k.clone(), text.clone())),
            _ => None,
        })
        .collect();
    for (key, text) in pending {
        filters.insert(key, FilterValue::text(text));
    }
}
