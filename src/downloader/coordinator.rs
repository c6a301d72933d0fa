//! Collection coordinator
//!
//! Drives devices sequentially: remaining units go to the executor pool,
//! each success is handed to the sink and then durably marked complete, and
//! a device is marked complete only once every day of the range is recorded.
//! Unit failures are values in the [`RunSummary`]; checkpoint failures abort
//! the run.

use super::executor::{FetchExecutor, FetchResult, UnitFailure};
use super::plan::{remaining_devices, remaining_units};
use super::progress::ProgressState;
use crate::fetcher::{Credential, FetcherError};
use crate::metrics;
use crate::output::{OutputError, UnitSink};
use crate::registry::{Device, DeviceRegistry};
use crate::resume::{CheckpointStore, ResumeError};
use crate::shutdown::SharedShutdown;
use crate::{DateRange, WorkUnit};
use chrono::NaiveDate;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Run-level fatal errors
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Checkpoint could not be loaded or persisted
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] ResumeError),

    /// Blocking task panicked or was cancelled
    #[error("task error: {0}")]
    Task(String),
}

/// A unit that ended without being marked complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailureRecord {
    /// Device serial
    pub serial: String,
    /// Day of the unit
    pub day: NaiveDate,
    /// `fetch` or `sink`
    pub stage: &'static str,
    /// Fetch attempts made (fetch failures only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Error message
    pub error: String,
}

/// How one unit ended within a run
enum UnitOutcome {
    Completed { records: usize },
    SinkFailed(OutputError),
    FetchFailed(UnitFailure),
    Interrupted,
}

/// Days done and remaining for a device left incomplete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceProgress {
    /// Device serial
    pub serial: String,
    /// Display name
    pub name: String,
    /// Days of the range durably complete
    pub days_done: usize,
    /// Days of the range still pending
    pub days_remaining: usize,
    /// Unit failures observed in this run
    pub failures: usize,
}

/// Outcome of a collection run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Devices in the registry
    pub devices_total: usize,
    /// Devices already complete at startup
    pub devices_skipped: usize,
    /// Devices marked complete during this run
    pub devices_completed: usize,
    /// Devices left incomplete
    pub partial: Vec<DeviceProgress>,
    /// Units durably marked complete during this run
    pub units_fetched: usize,
    /// Units abandoned during backoff because of shutdown
    pub units_interrupted: usize,
    /// Records handed to the sink
    pub records: usize,
    /// Terminal unit failures
    pub failures: Vec<UnitFailureRecord>,
    /// Whether the run stopped because of shutdown
    pub cancelled: bool,
}

impl RunSummary {
    /// Whether every device is complete
    pub fn is_complete(&self) -> bool {
        self.partial.is_empty() && !self.cancelled
    }
}

/// Drives the pipeline over a registry and a date range
pub struct Coordinator {
    registry: DeviceRegistry,
    range: DateRange,
    store: Arc<CheckpointStore>,
    executor: FetchExecutor,
    sink: Arc<dyn UnitSink>,
    shutdown: SharedShutdown,
    show_progress: bool,
}

impl Coordinator {
    /// Create a coordinator. Progress bars are off by default.
    pub fn new(
        registry: DeviceRegistry,
        range: DateRange,
        store: CheckpointStore,
        executor: FetchExecutor,
        sink: Arc<dyn UnitSink>,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            registry,
            range,
            store: Arc::new(store),
            executor,
            sink,
            shutdown,
            show_progress: false,
        }
    }

    /// Show per-device progress bars on stderr
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Run the pipeline until every device is complete or shutdown is observed.
    pub async fn run(&self, credential: &Credential) -> Result<RunSummary, CollectError> {
        let store = Arc::clone(&self.store);
        blocking(move || store.load()).await??;
        self.reconcile().await?;

        let remaining = remaining_devices(&self.store, &self.registry);
        let mut summary = RunSummary {
            devices_total: self.registry.len(),
            devices_skipped: self.registry.len() - remaining.len(),
            ..RunSummary::default()
        };

        info!(
            devices_total = summary.devices_total,
            devices_remaining = remaining.len(),
            days = self.range.num_days(),
            start = %self.range.start(),
            end = %self.range.end(),
            concurrency = self.executor.concurrency(),
            "Starting collection run"
        );

        for (index, device) in remaining {
            if self.shutdown.is_triggered() {
                summary.cancelled = true;
                summary.partial.push(self.device_progress(device, 0));
                continue;
            }
            if credential.is_expired() {
                warn!(
                    device = %device.serial(),
                    valid_until = %credential.valid_until(),
                    "Credential has expired; requests may be rejected"
                );
            }

            let span = info_span!(
                "collect_device",
                device = %device.serial(),
                name = %device.name(),
                index
            );
            self.collect_device(index, device, credential, &mut summary)
                .instrument(span)
                .await?;
        }

        summary.cancelled |= self.shutdown.is_triggered();
        info!(
            devices_completed = summary.devices_completed,
            devices_skipped = summary.devices_skipped,
            devices_partial = summary.partial.len(),
            units_fetched = summary.units_fetched,
            records = summary.records,
            failures = summary.failures.len(),
            cancelled = summary.cancelled,
            "Collection run finished"
        );
        Ok(summary)
    }

    /// Revoke device claims whose units no longer cover the range.
    async fn reconcile(&self) -> Result<(), CollectError> {
        for device in &self.registry {
            let serial = device.serial();
            if self.store.is_device_complete(serial) && !self.store.covers(serial, &self.range) {
                warn!(
                    device = %serial,
                    days_done = self.store.days_complete_in(serial, &self.range),
                    days_total = self.range.num_days(),
                    "Device marked complete but range not covered, revoking completion"
                );
                let store = Arc::clone(&self.store);
                let serial = serial.to_string();
                blocking(move || store.revoke_device(&serial)).await??;
            }
        }
        Ok(())
    }

    async fn collect_device(
        &self,
        index: usize,
        device: &Device,
        credential: &Credential,
        summary: &mut RunSummary,
    ) -> Result<(), CollectError> {
        let units = remaining_units(&self.store, device.serial(), &self.range);
        info!(
            days_remaining = units.len(),
            days_total = self.range.num_days(),
            "Collecting device"
        );

        let bar = self.progress_bar(device, units.len() as u64);
        let mut progress = ProgressState::new(
            format!("{} ({})", device.name(), device.serial()),
            units.len() as u64,
        );
        let mut failures = 0;

        let settle =
            move |unit: WorkUnit, result: FetchResult| self.settle(index, device, unit, result);
        let mut results = std::pin::pin!(self.executor.fetch_all_then(credential, units, settle));
        while let Some(settled) = results.next().await {
            let (unit, outcome) = settled?;
            let mut records = 0;
            match outcome {
                UnitOutcome::Completed { records: count } => {
                    records = count;
                    summary.units_fetched += 1;
                    summary.records += count;
                }
                UnitOutcome::SinkFailed(error) => {
                    failures += 1;
                    summary.failures.push(UnitFailureRecord {
                        serial: device.serial().to_string(),
                        day: unit.date(),
                        stage: "sink",
                        attempts: None,
                        error: error.to_string(),
                    });
                }
                UnitOutcome::FetchFailed(failure) => {
                    failures += 1;
                    summary.failures.push(UnitFailureRecord {
                        serial: device.serial().to_string(),
                        day: unit.date(),
                        stage: "fetch",
                        attempts: Some(failure.attempts),
                        error: failure.error.to_string(),
                    });
                }
                UnitOutcome::Interrupted => summary.units_interrupted += 1,
            }

            progress.update(records as u64);
            bar.inc(1);
            if progress.should_emit_update() {
                info!("{}", progress.format_progress());
                progress.mark_emitted();
            }
        }
        bar.finish_and_clear();

        let days_done = self.store.days_complete_in(device.serial(), &self.range);
        if days_done == self.range.num_days() {
            let store = Arc::clone(&self.store);
            let serial = device.serial().to_string();
            blocking(move || store.mark_device_complete(&serial)).await??;
            summary.devices_completed += 1;
            metrics::record_device_completed();
            info!(
                days = days_done,
                records = progress.records,
                elapsed_secs = progress.start_time.elapsed().as_secs_f64(),
                "Device complete"
            );
        } else {
            let entry = self.device_progress(device, failures);
            info!(
                days_done = entry.days_done,
                days_remaining = entry.days_remaining,
                failures,
                "Device partially complete"
            );
            summary.partial.push(entry);
        }
        Ok(())
    }

    /// Settle one fetched unit inside its pool slot: hand the payload to the
    /// sink, then durably mark the unit complete.
    ///
    /// Fetch and sink failures are outcomes; only checkpoint failures are errors.
    async fn settle(
        &self,
        index: usize,
        device: &Device,
        unit: WorkUnit,
        result: FetchResult,
    ) -> Result<(WorkUnit, UnitOutcome), CollectError> {
        let payload = match result {
            Ok(payload) => payload,
            Err(failure) if failure.error == FetcherError::Interrupted => {
                return Ok((unit, UnitOutcome::Interrupted));
            }
            Err(failure) => {
                metrics::record_unit_failure(failure.error.error_type().label());
                return Ok((unit, UnitOutcome::FetchFailed(failure)));
            }
        };

        let records = payload.len();
        let sink = Arc::clone(&self.sink);
        let owned_device = device.clone();
        let window = unit.window();
        let accepted = blocking(move || sink.accept(&owned_device, &window, &payload)).await?;
        if let Err(error) = accepted {
            warn!(unit = %unit, error = %error, "Sink rejected unit, leaving it pending");
            metrics::record_unit_failure("sink");
            return Ok((unit, UnitOutcome::SinkFailed(error)));
        }

        let store = Arc::clone(&self.store);
        let serial = device.serial().to_string();
        let day = unit.date();
        let newly = blocking(move || store.mark_unit_complete(index, &serial, day)).await??;
        if !newly {
            debug!(unit = %unit, "Unit was already marked complete");
        }
        metrics::record_unit_completed();
        Ok((unit, UnitOutcome::Completed { records }))
    }

    fn device_progress(&self, device: &Device, failures: usize) -> DeviceProgress {
        let days_done = self.store.days_complete_in(device.serial(), &self.range);
        DeviceProgress {
            serial: device.serial().to_string(),
            name: device.name().to_string(),
            days_done,
            days_remaining: self.range.num_days() - days_done,
            failures,
        }
    }

    fn progress_bar(&self, device: &Device, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} days ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message(format!("{} ({})", device.name(), device.serial()));
        bar
    }
}

async fn blocking<T, F>(f: F) -> Result<T, CollectError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CollectError::Task(e.to_string()))
}
