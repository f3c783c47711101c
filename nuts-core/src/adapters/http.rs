//! Shared HTTP plumbing for provider adapters
//!
//! Clients are built per call. A blocking client owns a runtime of its own
//! and must not be dropped on an async worker thread.

use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::domain::result::{Error, Result};

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("nuts/", env!("CARGO_PKG_VERSION"));

/// Client builder with the common timeout and user agent
pub(crate) fn builder() -> ClientBuilder {
    Client::builder().timeout(REQUEST_TIMEOUT).user_agent(USER_AGENT)
}

pub(crate) fn build(provider: &str, builder: ClientBuilder) -> Result<Client> {
    builder
        .build()
        .map_err(|e| Error::config(format!("{}: failed to create HTTP client: {}", provider, e)))
}

/// Map transport failures. Everything that never reached the provider is worth retrying.
pub(crate) fn map_request_error(provider: &str, error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::transient(
            provider,
            format!("timed out after {} seconds", REQUEST_TIMEOUT.as_secs()),
        )
    } else if error.is_connect() {
        Error::transient(provider, "unable to connect")
    } else {
        Error::transient(provider, error.to_string())
    }
}

/// Map an HTTP error status to the error taxonomy
pub(crate) fn status_error(provider: &str, status: StatusCode, detail: &str) -> Error {
    let message = if detail.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), detail)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::PAYMENT_REQUIRED => {
            Error::provider_auth(provider, message)
        }
        StatusCode::TOO_MANY_REQUESTS => Error::rate_limited(provider, message),
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            Error::not_found(format!("{} {}", provider, message))
        }
        StatusCode::REQUEST_TIMEOUT => Error::transient(provider, message),
        s if s.is_server_error() => Error::transient(provider, message),
        _ => Error::validation(format!("{} rejected request: {}", provider, message)),
    }
}

/// Fail on a non-success status, otherwise hand the response back
///
/// `detail` pulls a human message out of the provider's error body.
pub(crate) fn check_status(
    provider: &str,
    response: Response,
    detail: impl Fn(&str) -> Option<String>,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let message = detail(&body).unwrap_or_default();
    tracing::warn!(provider, status = status.as_u16(), "provider returned an error status");
    Err(status_error(provider, status, &message))
}

/// Decode a JSON body; malformed bodies count as a transient provider fault
pub(crate) fn read_json<T: DeserializeOwned>(provider: &str, response: Response) -> Result<T> {
    response
        .json::<T>()
        .map_err(|e| Error::transient(provider, format!("failed to parse response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error("teller", StatusCode::UNAUTHORIZED, ""),
            Error::ProviderAuth { .. }
        ));
        assert!(matches!(
            status_error("simplefin", StatusCode::PAYMENT_REQUIRED, ""),
            Error::ProviderAuth { .. }
        ));
        assert!(matches!(
            status_error("mono", StatusCode::TOO_MANY_REQUESTS, "slow down"),
            Error::ProviderRateLimit { .. }
        ));
        assert!(status_error("mono", StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!status_error("mono", StatusCode::UNPROCESSABLE_ENTITY, "").is_retryable());
        assert!(matches!(
            status_error("teller", StatusCode::NOT_FOUND, ""),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_status_message_includes_detail() {
        let err = status_error("mono", StatusCode::BAD_REQUEST, "invalid code");
        assert!(err.to_string().contains("HTTP 400: invalid code"));
    }
}
