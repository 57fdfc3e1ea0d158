//! Shared HTTP plumbing for the reqwest-based adapters
//!
//! Status codes and transport errors are mapped onto [`SourceError`] the
//! same way for SOAP, streaming JSON and GCS: timeouts, throttling and
//! server errors are transient, everything else is fatal.

use crate::domain::SourceError;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;

/// Builds a client with the given request timeout
pub(crate) fn build_client(timeout_seconds: u64) -> Result<Client, SourceError> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_seconds))
        .connect_timeout(Duration::from_secs(timeout_seconds.min(30)))
        .build()
        .map_err(|e| SourceError::fatal(format!("Failed to build HTTP client: {e}")))
}

/// Returns true for statuses worth retrying
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Error for a non-success response
pub(crate) fn status_error(context: &str, status: StatusCode, body: &str) -> SourceError {
    let snippet: String = body.chars().take(200).collect();
    let message = format!("{context} failed with status {status}: {snippet}");
    if is_transient_status(status) {
        SourceError::transient(message)
    } else {
        SourceError::fatal(message)
    }
}

/// Error for a request that produced no response
pub(crate) fn request_error(context: &str, error: reqwest::Error) -> SourceError {
    if error.is_builder() {
        SourceError::fatal(format!("{context}: invalid request: {error}"))
    } else {
        SourceError::transient(format!("{context}: {error}"))
    }
}
