//! reqwest-backed [`RecordApi`].

use super::{dialect, ListQuery, Page, RecordApi};
use crate::auth::CredentialProvider;
use crate::config::EngineConfig;
use crate::error::{Error, Result, RELOGIN_HINT};
use crate::types::Record;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Record API over the CRM list-view endpoint.
pub struct HttpRecordApi {
    http: reqwest::Client,
    endpoint: String,
    credentials: Arc<dyn CredentialProvider>,
    trust_page_meta: bool,
}

impl HttpRecordApi {
    /// Build from configuration with a fresh HTTP client.
    pub fn from_config(config: &EngineConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, &config.list_endpoint, credentials)
            .with_trusted_page_meta(config.trust_page_meta))
    }

    /// Build around an existing HTTP client.
    pub fn with_http_client(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            credentials,
            trust_page_meta: false,
        }
    }

    /// Read `meta.total` from responses.
    #[must_use]
    pub fn with_trusted_page_meta(mut self, trust: bool) -> Self {
        self.trust_page_meta = trust;
        self
    }

    /// Full URL for a page request.
    pub fn page_url(&self, query: &ListQuery) -> Result<Url> {
        let base = format!(
            "{}/{}/views/list",
            self.endpoint.trim_end_matches('/'),
            query.module
        );
        let mut url = Url::parse(&base)
            .map_err(|e| Error::Configuration(format!("invalid list endpoint '{base}': {e}")))?;
        url.query_pairs_mut().extend_pairs(dialect::list_params(query));
        Ok(url)
    }

    fn parse_page(&self, module: &str, body: &Value) -> Page {
        let rows = body
            .pointer("/data/attributes/tableData")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let raw_count = rows.len();
        let records: Vec<Record> = rows
            .into_iter()
            .filter_map(|row| Record::from_json(module, row))
            .collect();
        if records.len() < raw_count {
            warn!(module, dropped = raw_count - records.len(), "records without id dropped");
        }
        let reported_total = if self.trust_page_meta {
            body.pointer("/meta/total").and_then(|v| match v {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
        } else {
            None
        };
        Page {
            records,
            reported_total,
        }
    }
}

impl fmt::Debug for HttpRecordApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRecordApi")
            .field("endpoint", &self.endpoint)
            .field("trust_page_meta", &self.trust_page_meta)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RecordApi for HttpRecordApi {
    async fn list_page(&self, query: &ListQuery) -> Result<Page> {
        let token = self.credentials.resolve_token().await?;
        let url = self.page_url(query)?;
        debug!(module = %query.module, page = query.page, url = %url, "list request");

        let response = self
            .http
            .get(url)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| Error::from_transport(&query.module, &e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(module = %query.module, "401 from record API; token rejected");
            self.credentials.invalidate(&token);
            return Err(Error::Unauthenticated {
                hint: RELOGIN_HINT.to_string(),
            });
        }
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                module: query.module.clone(),
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        let page = self.parse_page(&query.module, &body);
        debug!(module = %query.module, page = query.page, records = page.records.len(), "list response");
        Ok(page)
    }
}
