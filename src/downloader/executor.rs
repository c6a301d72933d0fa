//! Fetch executor (bounded concurrency, retry, backoff)
//!
//! The executor never touches the checkpoint. It turns work units into
//! [`FetchResult`] values; retryable errors never escape it.

use super::config::RetryPolicy;
use crate::fetcher::{Credential, DeviceFetcher, DevicePayload, FetcherError, RetryContext};
use crate::metrics::{self, FetchAttemptMetrics};
use crate::shutdown::SharedShutdown;
use crate::WorkUnit;
use futures::future::{self, Future};
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal failure of one work unit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{unit} failed after {attempts} attempt(s): {error}")]
pub struct UnitFailure {
    /// Unit that failed
    pub unit: WorkUnit,
    /// Attempts made
    pub attempts: u32,
    /// Last error observed
    pub error: FetcherError,
}

/// Outcome of fetching one work unit
pub type FetchResult = Result<DevicePayload, UnitFailure>;

/// Executes fetches for work units under a retry policy
#[derive(Clone)]
pub struct FetchExecutor {
    fetcher: Arc<dyn DeviceFetcher>,
    policy: RetryPolicy,
    concurrency: usize,
    shutdown: SharedShutdown,
}

impl FetchExecutor {
    /// Create an executor running at most `concurrency` fetches at once
    pub fn new(
        fetcher: Arc<dyn DeviceFetcher>,
        policy: RetryPolicy,
        concurrency: usize,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            fetcher,
            policy,
            concurrency: concurrency.max(1),
            shutdown,
        }
    }

    /// Maximum concurrent fetches
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch one unit, retrying retryable errors with capped exponential backoff.
    ///
    /// `max_retries` bounds the total number of attempts. Shutdown is checked
    /// before each backoff and races the sleep itself; a unit interrupted that
    /// way fails with [`FetcherError::Interrupted`].
    pub async fn fetch(&self, credential: &Credential, unit: &WorkUnit) -> FetchResult {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let timer = FetchAttemptMetrics::start(attempt);
            let outcome = match tokio::time::timeout(
                self.policy.request_timeout,
                self.fetcher.fetch_day(credential, unit),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetcherError::Timeout),
            };

            let error = match outcome {
                Ok(payload) => {
                    timer.finish("success");
                    if attempt > 1 {
                        info!(
                            unit = %unit,
                            attempt,
                            "Retry attempt {attempt}/{max_attempts} succeeded for {unit}"
                        );
                    }
                    debug!(unit = %unit, records = payload.len(), attempt, "Fetched unit");
                    return Ok(payload);
                }
                Err(error) => error,
            };

            let error_type = error.error_type();
            timer.finish(error_type.label());

            if !error.is_retryable() || attempt >= max_attempts {
                let ctx = RetryContext::new(
                    attempt,
                    max_attempts,
                    &error,
                    std::time::Duration::ZERO,
                    unit.to_string(),
                );
                warn!(
                    unit = %unit,
                    attempts = attempt,
                    error_type = error_type.label(),
                    "{}",
                    ctx.format_failure()
                );
                return Err(UnitFailure {
                    unit: unit.clone(),
                    attempts: attempt,
                    error,
                });
            }

            let backoff = self.policy.backoff(attempt - 1);
            let ctx = RetryContext::new(attempt, max_attempts, &error, backoff, unit.to_string());
            warn!(
                unit = %unit,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "{}",
                ctx.format_retry()
            );

            if self.shutdown.is_triggered() {
                return Err(self.interrupted(unit, attempt));
            }
            metrics::record_retry(error_type.label(), backoff);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.cancelled() => return Err(self.interrupted(unit, attempt)),
            }
        }
    }

    /// Fetch `units` with at most `concurrency` in flight.
    ///
    /// Units are pulled lazily; once shutdown is triggered no further unit is
    /// started, while those already started run to completion. Results are
    /// yielded in completion order.
    pub fn fetch_all<'a>(
        &'a self,
        credential: &'a Credential,
        units: Vec<WorkUnit>,
    ) -> impl Stream<Item = (WorkUnit, FetchResult)> + 'a {
        self.fetch_all_then(credential, units, |unit, result| future::ready((unit, result)))
    }

    /// Like [`FetchExecutor::fetch_all`], but each unit's result is passed to
    /// `settle` inside the same pooled future.
    ///
    /// Slow settling (writing the payload, recording completion) then occupies
    /// a pool slot without stalling the other in-flight fetches.
    pub fn fetch_all_then<'a, F, Fut, T>(
        &'a self,
        credential: &'a Credential,
        units: Vec<WorkUnit>,
        settle: F,
    ) -> impl Stream<Item = T> + 'a
    where
        F: Fn(WorkUnit, FetchResult) -> Fut + Clone + 'a,
        Fut: Future<Output = T> + 'a,
        T: 'a,
    {
        let shutdown = self.shutdown.clone();
        stream::iter(units)
            .take_while(move |_| {
                let proceed = !shutdown.is_triggered();
                async move { proceed }
            })
            .map(move |unit| {
                let settle = settle.clone();
                async move {
                    let result = self.fetch(credential, &unit).await;
                    settle(unit, result).await
                }
            })
            .buffer_unordered(self.concurrency)
    }

    fn interrupted(&self, unit: &WorkUnit, attempts: u32) -> UnitFailure {
        debug!(unit = %unit, attempts, "Shutdown requested - abandoning retry");
        UnitFailure {
            unit: unit.clone(),
            attempts,
            error: FetcherError::Interrupted,
        }
    }
}

impl std::fmt::Debug for FetchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchExecutor")
            .field("policy", &self.policy)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}
