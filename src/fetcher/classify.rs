//! Retry classification and message formatting.
//!
//! Maps [`FetcherError`] values to user-facing categories and formats the
//! retry, recovery and failure lines the executor logs for each work unit.

use super::FetcherError;
use std::time::Duration;

/// Classification of fetch errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Attempt exceeded its timeout
    NetworkTimeout,
    /// Connection refused, DNS failure, or other transport failure
    NetworkOffline,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other client errors (4xx)
    ClientError(u16),
    /// Response body did not match the expected envelope
    MalformedResponse,
    /// API envelope reported failure
    ApiRejected,
    /// Shutdown observed before retrying
    Interrupted,
}

impl RetryErrorType {
    /// User-friendly description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::RateLimit => "rate limit exceeded",
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "authentication failed (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                404 => "resource not found",
                _ => "client error",
            },
            Self::MalformedResponse => "malformed response",
            Self::ApiRejected => "request rejected by API",
            Self::Interrupted => "shutdown requested",
        }
    }

    /// Suggested remediation shown with terminal failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection or raise fetch.request_timeout",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::ServerError(_) => "The API may be experiencing issues, rerun later to resume",
            Self::RateLimit => "Lower fetch.concurrency and rerun to resume",
            Self::AuthFailed(_) => "Verify API_APP_ID, API_APP_SECRET, API_EMAIL and API_PASSWORD",
            Self::ClientError(_) => "Check the device serial and date range",
            Self::MalformedResponse => "Check api.base_url points at the history API",
            Self::ApiRejected => "Check the API message; the device may not report history",
            Self::Interrupted => "Rerun to resume the remaining days",
        }
    }

    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "timeout",
            Self::NetworkOffline => "network",
            Self::ServerError(_) => "server_error",
            Self::RateLimit => "rate_limited",
            Self::AuthFailed(_) => "auth_failed",
            Self::ClientError(_) => "client_error",
            Self::MalformedResponse => "malformed",
            Self::ApiRejected => "api_rejected",
            Self::Interrupted => "interrupted",
        }
    }
}

impl From<&FetcherError> for RetryErrorType {
    fn from(error: &FetcherError) -> Self {
        match error {
            FetcherError::Timeout => Self::NetworkTimeout,
            FetcherError::Network(_) => Self::NetworkOffline,
            FetcherError::Server(code) => Self::ServerError(*code),
            FetcherError::Client { status: 429, .. } => Self::RateLimit,
            FetcherError::Client {
                status: status @ (401 | 403),
                ..
            } => Self::AuthFailed(*status),
            FetcherError::Client { status, .. } => Self::ClientError(*status),
            FetcherError::Malformed(_) => Self::MalformedResponse,
            FetcherError::Api { .. } => Self::ApiRejected,
            FetcherError::Interrupted => Self::Interrupted,
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Work unit label (`SERIAL:YYYY-MM-DD`)
    pub unit: String,
    /// Original error message for details
    pub error_message: String,
}

impl RetryContext {
    /// Build a context from the failed attempt.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error: &FetcherError,
        backoff_duration: Duration,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type: error.error_type(),
            backoff_duration,
            unit: unit.into(),
            error_message: error.to_string(),
        }
    }

    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying {} (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.unit,
            self.attempt + 1,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        )
    }

    /// Format final failure summary with a remediation hint.
    pub fn format_failure(&self) -> String {
        [
            format!(
                "[FAILED] {} failed after {} attempt(s)",
                self.unit, self.attempt
            ),
            format!("  Last error: {}", self.error_message),
            format!("  Suggestion: {}", self.error_type.suggestion()),
        ]
        .join("\n")
    }
}
