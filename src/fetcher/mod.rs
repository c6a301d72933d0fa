//! Device history fetchers
//!
//! A [`DeviceFetcher`] issues exactly one request per call; retries, backoff
//! and the per-attempt timeout are owned by
//! [`crate::downloader::FetchExecutor`].

use crate::WorkUnit;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod auth;
pub mod classify;
pub mod client;
pub mod http;

pub use auth::{
    ApiCredentialProvider, ApiCredentials, Credential, CredentialError, CredentialProvider,
    StaticCredentialProvider,
};
pub use classify::{RetryContext, RetryErrorType};
pub use client::build_http_client;
pub use http::HttpDeviceFetcher;

/// Fetcher errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetcherError {
    /// Attempt exceeded its timeout
    #[error("request timed out")]
    Timeout,

    /// Connection or transport failure
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 5xx
    #[error("server error: HTTP {0}")]
    Server(u16),

    /// HTTP 4xx (429 included)
    #[error("client error: HTTP {status}: {message}")]
    Client {
        /// HTTP status code
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// Body could not be decoded into the expected envelope
    #[error("malformed response: {0}")]
    Malformed(String),

    /// API envelope reported `success: false`
    #[error("API error {code}: {message}")]
    Api {
        /// API error code
        code: String,
        /// API error message
        message: String,
    },

    /// Shutdown observed before a retry
    #[error("interrupted by shutdown")]
    Interrupted,
}

impl FetcherError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_) | Self::Server(_))
    }

    /// Classification used for retry messages and metrics labels
    pub fn error_type(&self) -> RetryErrorType {
        RetryErrorType::from(self)
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One named measurement inside a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name (becomes a CSV column)
    pub name: String,
    /// Raw value as reported; `None` when absent or empty
    pub value: Option<String>,
    /// Unit of measure
    pub unit: Option<String>,
}

/// All attributes collected at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    /// Collection time (unix seconds)
    pub collect_time: i64,
    /// Attributes in the order the API returned them
    pub attributes: Vec<Attribute>,
}

/// Successful response for one work unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePayload {
    /// Records for the unit's day; empty when the device reported nothing
    pub records: Vec<DataRecord>,
}

impl DevicePayload {
    /// Create a payload from records
    pub fn new(records: Vec<DataRecord>) -> Self {
        Self { records }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the payload holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Fetches one device-day of history
#[async_trait]
pub trait DeviceFetcher: Send + Sync {
    /// Issue a single request for `unit` using `credential`.
    ///
    /// Implementations must not retry; the caller owns the retry policy.
    async fn fetch_day(
        &self,
        credential: &Credential,
        unit: &WorkUnit,
    ) -> FetcherResult<DevicePayload>;
}
