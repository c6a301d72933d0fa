//! Shared HTTP client construction
//!
//! One `reqwest::Client` is built per process and cloned into every fetcher
//! and credential provider so the connection pool is shared.

use super::{FetcherError, FetcherResult};
use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client with explicit timeouts to prevent indefinite hangs.
pub fn build_http_client(connect_timeout: Duration, request_timeout: Duration) -> FetcherResult<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .map_err(|e| {
            FetcherError::Network(format!(
                "Failed to build HTTP client: {e}. Check system TLS configuration."
            ))
        })
}
