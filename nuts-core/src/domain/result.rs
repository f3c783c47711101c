//! Result and error types for the core library

use thiserror::Error;

/// Core library error type
///
/// Provider variants carry the provider name so failures collected during a
/// sync can be traced back to the adapter that produced them.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{provider} authentication failed: {message}")]
    ProviderAuth { provider: String, message: String },

    #[error("{provider} rate limit exceeded: {message}")]
    ProviderRateLimit { provider: String, message: String },

    #[error("{provider} data not yet available: {message}")]
    ProviderDataUnavailable { provider: String, message: String },

    #[error("{provider} request failed: {message}")]
    ProviderTransient { provider: String, message: String },

    #[error("Database error: {0}")]
    Persistence(String),

    #[error("Reconciliation failed for {provider} account {account_id}: {message}")]
    PartialReconciliation {
        provider: String,
        account_id: String,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn provider_auth(provider: &str, msg: impl Into<String>) -> Self {
        Self::ProviderAuth {
            provider: provider.to_string(),
            message: msg.into(),
        }
    }

    pub fn rate_limited(provider: &str, msg: impl Into<String>) -> Self {
        Self::ProviderRateLimit {
            provider: provider.to_string(),
            message: msg.into(),
        }
    }

    pub fn data_unavailable(provider: &str, msg: impl Into<String>) -> Self {
        Self::ProviderDataUnavailable {
            provider: provider.to_string(),
            message: msg.into(),
        }
    }

    pub fn transient(provider: &str, msg: impl Into<String>) -> Self {
        Self::ProviderTransient {
            provider: provider.to_string(),
            message: msg.into(),
        }
    }

    /// Whether a job that failed with this error may be run again unchanged.
    ///
    /// Auth failures need the user to re-link, configuration and validation
    /// errors will fail identically, and cancellation was requested.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ProviderRateLimit { .. }
                | Error::ProviderDataUnavailable { .. }
                | Error::ProviderTransient { .. }
                | Error::Persistence(_)
        )
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;
