//! Error types for the query engine.
//!
//! Only terminal failures live here. Degraded-but-successful paths (an
//! unresolved user name, records without a numeric amount) are recorded as
//! data on the result types instead.

use thiserror::Error;

/// Remediation hint attached to credential failures.
pub const LOGIN_HINT: &str = "You are not logged in. Please log in to the CRM with your username and password.";

/// Hint attached when the record API rejects a previously valid token.
pub const RELOGIN_HINT: &str = "CRM authentication failed. Please log in again.";

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while compiling and executing record queries.
#[derive(Error, Debug)]
pub enum Error {
    /// No valid credential is available, or the upstream rejected it
    #[error("Unauthenticated: {hint}")]
    Unauthenticated {
        /// What the caller should do to recover
        hint: String,
    },

    /// The record API could not be reached or the connection failed mid-request
    #[error("Transport failure while querying '{module}': {message}")]
    UpstreamTransport {
        /// Module being queried
        module: String,
        /// Underlying transport error
        message: String,
    },

    /// The record API answered with a non-success status
    #[error("Record API returned HTTP {status} for '{module}'")]
    UpstreamStatus {
        /// Module being queried
        module: String,
        /// HTTP status code
        status: u16,
    },

    /// The record API answered with a body that could not be interpreted
    #[error("Malformed response from record API: {0}")]
    Deserialization(String),

    /// A cache handle was unknown or already expired
    #[error("No cached records for handle '{handle}'")]
    CacheMiss {
        /// The handle that was looked up
        handle: String,
    },

    /// A task could not be executed as described
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// Engine configuration is incomplete or inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The classifier collaborator failed outright
    #[error("Classification failed: {0}")]
    Classification(String),
}

impl Error {
    /// Build an [`Error::Unauthenticated`] carrying the standard login hint.
    pub fn unauthenticated() -> Self {
        Self::Unauthenticated {
            hint: LOGIN_HINT.to_string(),
        }
    }

    /// Short explanatory sentence suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthenticated { hint } => hint.clone(),
            Self::UpstreamTransport { module, .. } => {
                format!("Could not reach the CRM while querying {module}. Please try again.")
            },
            Self::UpstreamStatus { module, status } => {
                format!("The CRM rejected the {module} query (HTTP {status}).")
            },
            Self::Deserialization(_) => {
                "The CRM returned data in an unexpected format.".to_string()
            },
            Self::CacheMiss { .. } => {
                "The cached results have expired. Please run the query again.".to_string()
            },
            Self::InvalidTask(reason) => format!("This request could not be processed: {reason}"),
            Self::Configuration(reason) => format!("The query engine is misconfigured: {reason}"),
            Self::Classification(_) => {
                "Could not identify module from query and conversation history.".to_string()
            },
        }
    }

    /// Whether repeating the same call could plausibly succeed.
    ///
    /// Credential failures are never retryable without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UpstreamTransport { .. } => true,
            Self::UpstreamStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(feature = "http-client")]
impl Error {
    pub(crate) fn from_transport(module: &str, err: &reqwest::Error) -> Self {
        Self::UpstreamTransport {
            module: module.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_carries_hint() {
        let err = Error::unauthenticated();
        assert!(err.to_string().contains("log in to the CRM"));
        assert_eq!(err.user_message(), LOGIN_HINT);
        assert!(!LOGIN_HINT.contains("tool"));
        assert!(!RELOGIN_HINT.contains("tool"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_upstream_status_message() {
        let err = Error::UpstreamStatus {
            module: "Cases".to_string(),
            status: 502,
        };
        let msg = err.to_string();
        assert!(msg.contains("502"));
        assert!(msg.contains("Cases"));
        assert!(err.is_retryable());
        assert!(err.user_message().contains("Cases"));
    }

    #[test]
    fn test_client_status_not_retryable() {
        let err = Error::UpstreamStatus {
            module: "Leads".to_string(),
            status: 400,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cache_miss_message() {
        let err = Error::CacheMiss {
            handle: "crm_data_deadbeef".to_string(),
        };
        assert!(err.to_string().contains("crm_data_deadbeef"));
        assert!(err.user_message().contains("expired"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
