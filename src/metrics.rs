//! Collection metrics
//!
//! Counters and histograms for fetch attempts, retries, unit and device
//! completion, and checkpoint persistence. Recording is a no-op until
//! [`init_metrics`] installs the Prometheus exporter.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

/// Initialize metrics system with a Prometheus scrape endpoint on `addr`.
///
/// Idempotent: later calls are no-ops.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!(addr = %addr, "Initializing metrics system");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "fetch_attempts_total",
        Unit::Count,
        "Fetch attempts by outcome"
    );
    describe_counter!(
        "fetch_retries_total",
        Unit::Count,
        "Retries scheduled after a retryable fetch error"
    );
    describe_histogram!(
        "fetch_duration_seconds",
        Unit::Seconds,
        "Duration of a single fetch attempt"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff waited before a retry"
    );
    describe_counter!(
        "units_completed_total",
        Unit::Count,
        "Work units durably marked complete"
    );
    describe_counter!(
        "unit_failures_total",
        Unit::Count,
        "Work units that ended in a terminal failure"
    );
    describe_counter!(
        "devices_completed_total",
        Unit::Count,
        "Devices marked fully processed"
    );
    describe_counter!(
        "checkpoint_persist_retries_total",
        Unit::Count,
        "Checkpoint renames retried after a transient error"
    );

    *initialized = true;
    info!(addr = %addr, "Metrics system initialized successfully");
    Ok(())
}

/// Whether [`init_metrics`] has succeeded
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Times one fetch attempt
#[derive(Debug)]
pub struct FetchAttemptMetrics {
    started: Instant,
    attempt: u32,
}

impl FetchAttemptMetrics {
    /// Start timing attempt number `attempt` (1-based)
    pub fn start(attempt: u32) -> Self {
        Self {
            started: Instant::now(),
            attempt,
        }
    }

    /// Record the attempt's outcome label (`success`, `timeout`, ...)
    pub fn finish(self, outcome: &'static str) {
        let elapsed = self.started.elapsed();
        counter!(
            "fetch_attempts_total",
            "outcome" => outcome,
            "first_attempt" => if self.attempt == 1 { "true" } else { "false" }
        )
        .increment(1);
        histogram!("fetch_duration_seconds", "outcome" => outcome).record(elapsed.as_secs_f64());
    }
}

/// Record a scheduled retry and its backoff
pub fn record_retry(error_type: &'static str, backoff: Duration) {
    counter!("fetch_retries_total", "error_type" => error_type).increment(1);
    histogram!("retry_backoff_duration_seconds").record(backoff.as_secs_f64());
}

/// Record a unit durably marked complete
pub fn record_unit_completed() {
    counter!("units_completed_total").increment(1);
}

/// Record a terminal unit failure
pub fn record_unit_failure(error_type: &'static str) {
    counter!("unit_failures_total", "error_type" => error_type).increment(1);
}

/// Record a device marked complete
pub fn record_device_completed() {
    counter!("devices_completed_total").increment(1);
}

/// Record a retried checkpoint rename
pub fn record_persist_retry() {
    counter!("checkpoint_persist_retries_total").increment(1);
}
