//! Engine configuration.
//!
//! Values are resolved in priority order: environment variables, then the
//! `[engine]` table of a TOML file, then the built-in defaults.
//!
//! # Example Configuration File
//!
//! ```toml
//! [engine]
//! list_endpoint = "https://crm.example.com/legacy/Api/V8/custom"
//! ui_base_url = "https://crm.example.com"
//! page_size = 20
//! cache_ttl_secs = 3600
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "CRMQ_";

/// Runtime settings for the query engine.
///
/// | Field | Default |
/// |---|---|
/// | `page_size` | 20 |
/// | `max_pages` | 500 |
/// | `iteration_budget` | 20 000 |
/// | `aggregate_record_cap` | 40 000 |
/// | `count_verify_threshold` | 20 |
/// | `cache_ttl_secs` | 3 600 |
/// | `chart_max_categories` | 20 |
/// | `sample_size` | 20 |
/// | `request_timeout_ms` | 30 000 |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the list endpoint; `/{module}/views/list` is appended.
    pub list_endpoint: String,

    /// Base URL of the CRM web UI. Link enrichment is skipped when unset.
    pub ui_base_url: Option<String>,

    /// OAuth token endpoint used by the login client.
    pub login_endpoint: Option<String>,

    /// OAuth client id for the password grant.
    pub client_id: Option<String>,

    /// OAuth client secret for the password grant.
    pub client_secret: Option<String>,

    /// Records requested per page.
    pub page_size: u32,

    /// Hard cap on pages walked by a single iterating fetch.
    pub max_pages: u32,

    /// Record budget for iterating fetches that do not name their own.
    pub iteration_budget: usize,

    /// Record budget for sum, count and chart workflows.
    pub aggregate_record_cap: usize,

    /// A first page at least this full triggers a background total count.
    pub count_verify_threshold: usize,

    /// Lifetime of a cached result set.
    pub cache_ttl_secs: u64,

    /// Maximum categories kept in a chart dataset.
    pub chart_max_categories: usize,

    /// Records carried in sum/count envelopes as a preview.
    pub sample_size: usize,

    /// Per-request HTTP timeout.
    pub request_timeout_ms: u64,

    /// Trust `meta.total` reported by the list endpoint.
    pub trust_page_meta: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            list_endpoint: String::new(),
            ui_base_url: None,
            login_endpoint: None,
            client_id: None,
            client_secret: None,
            page_size: 20,
            max_pages: 500,
            iteration_budget: 20_000,
            aggregate_record_cap: 40_000,
            count_verify_threshold: 20,
            cache_ttl_secs: 3_600,
            chart_max_categories: 20,
            sample_size: 20,
            request_timeout_ms: 30_000,
            trust_page_meta: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
}

impl EngineConfig {
    /// Configuration pointing at a list endpoint, defaults elsewhere.
    pub fn new(list_endpoint: impl Into<String>) -> Self {
        Self {
            list_endpoint: list_endpoint.into(),
            ..Self::default()
        }
    }

    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&contents)?
            },
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse the `[engine]` table of a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.engine)
    }

    /// Apply `CRMQ_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable numeric values are ignored and the previous value kept.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("LIST_ENDPOINT") {
            self.list_endpoint = v;
        }
        if let Some(v) = var("UI_BASE_URL") {
            self.ui_base_url = Some(v);
        }
        if let Some(v) = var("LOGIN_ENDPOINT") {
            self.login_endpoint = Some(v);
        }
        if let Some(v) = var("CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = var("CLIENT_SECRET") {
            self.client_secret = Some(v);
        }
        if let Some(v) = var("PAGE_SIZE") {
            if let Ok(v) = v.parse() {
                self.page_size = v;
            }
        }
        if let Some(v) = var("CACHE_TTL_SECS") {
            if let Ok(v) = v.parse() {
                self.cache_ttl_secs = v;
            }
        }
        if let Some(v) = var("REQUEST_TIMEOUT_MS") {
            if let Ok(v) = v.parse() {
                self.request_timeout_ms = v;
            }
        }
        if let Some(v) = var("COUNT_VERIFY_THRESHOLD") {
            if let Ok(v) = v.parse() {
                self.count_verify_threshold = v;
            }
        }
        if let Some(v) = var("TRUST_PAGE_META") {
            if let Ok(v) = v.parse() {
                self.trust_page_meta = v;
            }
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.list_endpoint.trim().is_empty() {
            return Err(Error::Configuration("list_endpoint is not set".to_string()));
        }
        if self.page_size == 0 {
            return Err(Error::Configuration("page_size must be positive".to_string()));
        }
        if self.cache_ttl_secs == 0 {
            return Err(Error::Configuration(
                "cache_ttl_secs must be positive".to_string(),
            ));
        }
        if self.max_pages == 0 {
            return Err(Error::Configuration("max_pages must be positive".to_string()));
        }
        Ok(())
    }

    /// Cache lifetime as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// HTTP timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Set the UI base URL used for deep links.
    #[must_use]
    pub fn with_ui_base_url(mut self, url: impl Into<String>) -> Self {
        self.ui_base_url = Some(url.into());
        self
    }

    /// Set the background-count threshold.
    #[must_use]
    pub fn with_count_verify_threshold(mut self, threshold: usize) -> Self {
        self.count_verify_threshold = threshold;
        self
    }

    /// Set the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the page-walk safety cap.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.max_pages, 500);
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.count_verify_threshold, 20);
        assert!(config.ui_base_url.is_none());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
            [engine]
            list_endpoint = "https://crm.test/api"
            page_size = 50
            trust_page_meta = true
        "#;
        let config = EngineConfig::from_toml(toml).unwrap();
        assert_eq!(config.list_endpoint, "https://crm.test/api");
        assert_eq!(config.page_size, 50);
        assert!(config.trust_page_meta);
        assert_eq!(config.max_pages, 500);
    }

    #[test]
    fn test_from_toml_without_engine_table() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = EngineConfig::from_toml("[engine]\npage_size = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_overrides_take_priority() {
        let vars: HashMap<&str, &str> = [
            ("CRMQ_LIST_ENDPOINT", "https://env.test"),
            ("CRMQ_PAGE_SIZE", "5"),
            ("CRMQ_CACHE_TTL_SECS", "not-a-number"),
            ("CRMQ_UI_BASE_URL", "https://ui.test"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::new("https://file.test");
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.list_endpoint, "https://env.test");
        assert_eq!(config.page_size, 5);
        assert_eq!(config.cache_ttl_secs, 3_600);
        assert_eq!(config.ui_base_url.as_deref(), Some("https://ui.test"));
    }

    #[test]
    fn test_validate() {
        assert!(EngineConfig::default().validate().is_err());
        assert!(EngineConfig::new("https://crm.test").validate().is_ok());
        assert!(EngineConfig::new("https://crm.test")
            .with_page_size(0)
            .validate()
            .is_err());
    }
}
