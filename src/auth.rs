//! Bearer credentials for the record API.
//!
//! [`SessionCredentials`] is the process-wide credential cache: a token
//! obtained through [`LoginClient`] lives there until it expires or the
//! record API rejects it. A token attached to the current request (for
//! example from an inbound `Authorization` header) always takes precedence;
//! scope it with [`with_request_token`].

use crate::cache::{Clock, SystemClock};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Seconds shaved off a token's lifetime so it is never used at the edge.
pub const EXPIRY_SKEW_SECS: i64 = 300;

/// Request tokens this short are treated as absent.
const MIN_REQUEST_TOKEN_LEN: usize = 10;

tokio::task_local! {
    static REQUEST_TOKEN: String;
}

/// Run `fut` with `token` as the request-scoped credential.
///
/// The token is visible to every credential lookup made by `fut` on the
/// same task, including futures it joins, but not to spawned tasks.
pub async fn with_request_token<F>(token: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_TOKEN.scope(token.into(), fut).await
}

fn request_token() -> Option<String> {
    REQUEST_TOKEN
        .try_with(|t| t.trim().to_string())
        .ok()
        .filter(|t| t.len() > MIN_REQUEST_TOKEN_LEN)
}

/// OAuth bearer token.
#[derive(Clone)]
pub struct BearerToken {
    /// The access token
    pub token: String,
    /// Token type (usually "Bearer")
    pub token_type: String,
    /// When the token stops being usable
    pub expires_at: Option<DateTime<Utc>>,
}

impl BearerToken {
    /// Token without expiry.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_type: "Bearer".to_string(),
            expires_at: None,
        }
    }

    /// Token expiring `expires_in_secs` after `now`, minus [`EXPIRY_SKEW_SECS`].
    pub fn expiring(token: impl Into<String>, now: DateTime<Utc>, expires_in_secs: i64) -> Self {
        let lifetime = TimeDelta::try_seconds(expires_in_secs - EXPIRY_SKEW_SECS)
            .unwrap_or_else(TimeDelta::zero);
        Self {
            expires_at: now.checked_add_signed(lifetime),
            ..Self::new(token)
        }
    }

    /// Whether the token is expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// `Authorization` header value.
    pub fn to_header_value(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies the bearer token for record API calls.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current token, or [`Error::Unauthenticated`] when none is active.
    async fn resolve_token(&self) -> Result<String>;

    /// Forget `token` after the record API rejected it.
    ///
    /// Only the cached copy matching `token` is cleared.
    fn invalidate(&self, token: &str);
}

/// Fixed token, for service accounts and tests.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken([REDACTED])")
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn resolve_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }

    fn invalidate(&self, _token: &str) {}
}

/// Session credential cache.
pub struct SessionCredentials {
    session: RwLock<Option<(String, BearerToken)>>,
    clock: Arc<dyn Clock>,
}

impl SessionCredentials {
    /// Empty cache on the system clock.
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Store the token obtained by `username`'s login.
    pub fn store(&self, username: impl Into<String>, token: BearerToken) {
        let username = username.into();
        info!(username = %username, expires_at = ?token.expires_at, "session token cached");
        *self.session.write() = Some((username, token));
    }

    /// Store a raw token that expires `expires_in_secs` from now.
    pub fn store_expiring(&self, username: impl Into<String>, token: impl Into<String>, expires_in_secs: i64) {
        let token = BearerToken::expiring(token, self.clock.now(), expires_in_secs);
        self.store(username, token);
    }

    /// User owning the cached session, if any.
    pub fn username(&self) -> Option<String> {
        self.session.read().as_ref().map(|(user, _)| user.clone())
    }

    /// Drop the cached session.
    pub fn clear(&self) {
        *self.session.write() = None;
    }

    fn session_token(&self) -> Option<String> {
        let now = self.clock.now();
        {
            let guard = self.session.read();
            match guard.as_ref() {
                None => return None,
                Some((_, token)) if !token.is_expired(now) => return Some(token.token.clone()),
                Some(_) => {},
            }
        }
        warn!("cached session expired");
        let mut guard = self.session.write();
        if guard.as_ref().is_some_and(|(_, t)| t.is_expired(now)) {
            *guard = None;
        }
        None
    }
}

impl Default for SessionCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("username", &self.username())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for SessionCredentials {
    async fn resolve_token(&self) -> Result<String> {
        if let Some(token) = request_token() {
            return Ok(token);
        }
        self.session_token().ok_or_else(Error::unauthenticated)
    }

    fn invalidate(&self, token: &str) {
        let mut guard = self.session.write();
        if guard.as_ref().is_some_and(|(_, t)| t.token == token) {
            warn!("session token rejected by record API; clearing");
            *guard = None;
        }
    }
}

/// Turns a plain password into whatever the login endpoint expects.
pub trait PasswordSealer: Send + Sync {
    /// Seal `plain` for transport.
    fn seal(&self, plain: &str) -> Result<String>;
}

/// Sends the password unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSealer;

impl PasswordSealer for PassthroughSealer {
    fn seal(&self, plain: &str) -> Result<String> {
        Ok(plain.to_string())
    }
}

#[cfg(feature = "http-client")]
pub use login::LoginClient;

#[cfg(feature = "http-client")]
mod login {
    use super::*;
    use crate::config::EngineConfig;
    use serde::Deserialize;

    const LOGIN_TIMEOUT_SECS: u64 = 15;

    #[derive(Debug, Deserialize)]
    struct TokenResponse {
        access_token: Option<String>,
        #[serde(default = "default_expires_in")]
        expires_in: i64,
    }

    fn default_expires_in() -> i64 {
        3_600
    }

    /// OAuth password-grant login that fills a [`SessionCredentials`].
    pub struct LoginClient {
        http: reqwest::Client,
        endpoint: String,
        client_id: String,
        client_secret: String,
        sealer: Arc<dyn PasswordSealer>,
        credentials: Arc<SessionCredentials>,
    }

    impl LoginClient {
        /// Build from configuration.
        ///
        /// Fails when the login endpoint or client credentials are missing.
        pub fn from_config(
            config: &EngineConfig,
            sealer: Arc<dyn PasswordSealer>,
            credentials: Arc<SessionCredentials>,
        ) -> Result<Self> {
            let missing = |what: &str| Error::Configuration(format!("{what} is not set"));
            let http = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(LOGIN_TIMEOUT_SECS))
                .build()
                .map_err(|e| Error::Configuration(format!("HTTP client: {e}")))?;
            Ok(Self {
                http,
                endpoint: config.login_endpoint.clone().ok_or_else(|| missing("login_endpoint"))?,
                client_id: config.client_id.clone().ok_or_else(|| missing("client_id"))?,
                client_secret: config
                    .client_secret
                    .clone()
                    .ok_or_else(|| missing("client_secret"))?,
                sealer,
                credentials,
            })
        }

        /// Log in and cache the resulting token.
        ///
        /// The grant is posted as a form first and retried as JSON when the
        /// endpoint answers with a client or server error.
        pub async fn login(&self, username: &str, password: &str) -> Result<BearerToken> {
            info!(username, "attempting login");
            let sealed = self.sealer.seal(password)?;
            let payload = [
                ("grant_type", "password"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("username", username),
                ("password", sealed.as_str()),
            ];

            let mut response = self
                .http
                .post(&self.endpoint)
                .form(&payload)
                .send()
                .await
                .map_err(|e| Error::from_transport("login", &e))?;

            if response.status().as_u16() >= 400 {
                debug!(status = response.status().as_u16(), "form login rejected; retrying as JSON");
                let body: serde_json::Map<String, serde_json::Value> = payload
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), serde_json::Value::from(*v)))
                    .collect();
                response = self
                    .http
                    .post(&self.endpoint)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| Error::from_transport("login", &e))?;
            }

            let status = response.status();
            if !status.is_success() {
                warn!(username, status = status.as_u16(), "login failed");
                return Err(Error::Unauthenticated {
                    hint: format!("Login failed (HTTP {}). Check your username and password.", status.as_u16()),
                });
            }

            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| Error::Deserialization(e.to_string()))?;
            let token = body
                .access_token
                .filter(|t| !t.is_empty())
                .ok_or_else(|| Error::Deserialization("login response missing access_token".to_string()))?;

            let bearer = BearerToken::expiring(token, self.credentials.clock.now(), body.expires_in);
            self.credentials.store(username, bearer.clone());
            Ok(bearer)
        }
    }

    impl fmt::Debug for LoginClient {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("LoginClient")
                .field("endpoint", &self.endpoint)
                .field("client_id", &self.client_id)
                .finish_non_exhaustive()
        }
    }
}
