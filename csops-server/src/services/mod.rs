//! Business services and external integration clients
//!
//! Integration clients are thin reqwest wrappers: one request per call, no
//! retries. Failures surface as `IntegrationError` and map to 502.

pub mod booking_sync;
pub mod calcom_client;
pub mod calendly_client;
pub mod fathom_client;
pub mod health;
pub mod insights;
pub mod notifier;
pub mod onboarding;
pub mod openai_client;
pub mod scheduler;
pub mod storage;

use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("csops/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// External integration errors
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for IntegrationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IntegrationError::Parse(err.to_string())
        } else {
            IntegrationError::Network(err.to_string())
        }
    }
}

impl From<object_store::Error> for IntegrationError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => IntegrationError::NotFound(path),
            other => IntegrationError::Storage(other.to_string()),
        }
    }
}

/// Shared HTTP client settings for integration clients
pub(crate) fn http_client() -> Result<reqwest::Client, IntegrationError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| IntegrationError::Network(e.to_string()))
}

/// Turn a non-2xx response into an `Api` error carrying the body text
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, IntegrationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(IntegrationError::Api(status.as_u16(), body))
}

/// Join a base URL and a path without doubling slashes
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.cal.com/v2/", "/bookings"),
            "https://api.cal.com/v2/bookings"
        );
        assert_eq!(join_url("http://x", "y"), "http://x/y");
    }
}
