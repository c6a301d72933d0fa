//! # Device Data Collector Library
//!
//! Collects historical per-device time-series data from a remote, rate-limited
//! API across a `{device} × {day}` cross product, and survives interruption
//! (Ctrl+C, crash, network outage) without re-fetching finished work.
//!
//! ## Features
//!
//! - **Resume Capability**: durable per-(device, day) and per-device checkpoint
//!   with atomic replace-on-write persistence
//! - **Bounded Concurrency**: one pool of parallel day fetches per device,
//!   devices processed sequentially
//! - **Retry with Backoff**: 5xx and timeouts retried with capped exponential
//!   backoff, client errors reported as terminal per-unit failures
//! - **Graceful Shutdown**: cooperative cancellation observed before each
//!   submission and before each backoff sleep
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::{FixedOffset, NaiveDate};
//! use device_data_collector::DateRange;
//! use device_data_collector::downloader::{Coordinator, FetchExecutor, RetryPolicy};
//! use device_data_collector::fetcher::{build_http_client, Credential, HttpDeviceFetcher};
//! use device_data_collector::output::CsvUnitSink;
//! use device_data_collector::registry::{Device, DeviceRegistry};
//! use device_data_collector::resume::{CheckpointStore, PersistPolicy};
//! use device_data_collector::shutdown::ShutdownSignal;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let offset = FixedOffset::east_opt(2 * 3600).unwrap();
//! let range = DateRange::new(
//!     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
//!     offset,
//! )?;
//! let registry = DeviceRegistry::from_devices(vec![Device::new("SN-0001", "Plant A")])?;
//! let client = build_http_client(Duration::from_secs(10), Duration::from_secs(60))?;
//! let fetcher = HttpDeviceFetcher::new(client, "https://globalapi.solarmanpv.com");
//! let shutdown = ShutdownSignal::shared();
//!
//! let executor = FetchExecutor::new(Arc::new(fetcher), RetryPolicy::default(), 30, shutdown.clone());
//! let store = CheckpointStore::new("checkpoints/progress.json", PersistPolicy::default());
//! let sink = CsvUnitSink::new("raw_data", offset);
//! let coordinator = Coordinator::new(registry, range, store, executor, Arc::new(sink), shutdown);
//!
//! let credential = Credential::new("token", chrono::Utc::now() + chrono::Duration::hours(1));
//! let summary = coordinator.run(&credential).await?;
//! println!("{} devices complete", summary.devices_completed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`resume`] - Checkpoint record, atomic store, and run lock
//! - [`downloader`] - Work planning, fetch executor, and coordinator
//! - [`fetcher`] - Device history fetchers, credentials, and error classification
//! - [`output`] - Sinks that consume each completed unit's payload
//! - [`registry`] - Ordered device registry
//! - [`shutdown`] - Cooperative cancellation signal
//! - [`config`] - YAML configuration with environment overrides
//! - [`metrics`] - Prometheus-compatible counters and histograms

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{Duration, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// CLI command implementations
pub mod cli;

/// Application configuration
pub mod config;

/// Collection orchestration
pub mod downloader;

/// Device history fetchers
pub mod fetcher;

/// Collection metrics
pub mod metrics;

/// Unit payload sinks
pub mod output;

/// Device registry
pub mod registry;

/// Resume capability for collection runs
pub mod resume;

/// Cooperative cancellation shared across modules
pub mod shutdown;

pub use registry::{Device, DeviceRegistry};

const SECONDS_PER_DAY: i64 = 86_400;

/// One calendar day in the collection timezone.
///
/// `start_unix` is local midnight and `end_unix` the last second of the day,
/// both inclusive; the following day starts at `end_unix + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayWindow {
    date: NaiveDate,
    start_unix: i64,
    end_unix: i64,
}

impl DayWindow {
    /// Build the window for `date` interpreted in `offset`.
    pub fn new(date: NaiveDate, offset: FixedOffset) -> Self {
        let local_midnight = date.and_time(NaiveTime::MIN).and_utc().timestamp();
        let start_unix = local_midnight - i64::from(offset.local_minus_utc());
        Self {
            date,
            start_unix,
            end_unix: start_unix + SECONDS_PER_DAY - 1,
        }
    }

    /// Local calendar date
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Day key used in the checkpoint (`YYYY-MM-DD`)
    pub fn key(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// First second of the day (unix seconds)
    pub fn start_unix(&self) -> i64 {
        self.start_unix
    }

    /// Last second of the day (unix seconds, inclusive)
    pub fn end_unix(&self) -> i64 {
        self.end_unix
    }
}

impl fmt::Display for DayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.date.format("%Y-%m-%d"))
    }
}

/// Inclusive range of calendar days in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
    offset: FixedOffset,
}

impl DateRange {
    /// Create a range covering `start..=end`.
    pub fn new(start: NaiveDate, end: NaiveDate, offset: FixedOffset) -> Result<Self, String> {
        if end < start {
            return Err(format!(
                "End date ({end}) must not be before start date ({start})"
            ));
        }
        Ok(Self { start, end, offset })
    }

    /// First day of the range
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the range (inclusive)
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Offset used to compute day boundaries
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Number of days in the range, never zero
    pub fn num_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Day partition of the range, in calendar order
    pub fn days(&self) -> impl Iterator<Item = DayWindow> + '_ {
        (0..self.num_days() as i64)
            .map(move |i| DayWindow::new(self.start + Duration::days(i), self.offset))
    }
}

/// One (device, day) fetch task. Immutable once generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    device_id: String,
    date: NaiveDate,
    start_unix: i64,
    end_unix: i64,
}

impl WorkUnit {
    /// Create a unit for `device_id` on `day`
    pub fn new(device_id: impl Into<String>, day: DayWindow) -> Self {
        Self {
            device_id: device_id.into(),
            date: day.date(),
            start_unix: day.start_unix(),
            end_unix: day.end_unix(),
        }
    }

    /// Owning device identifier
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Local calendar date of the unit
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// First second of the day (unix seconds)
    pub fn start_unix(&self) -> i64 {
        self.start_unix
    }

    /// Last second of the day (unix seconds, inclusive)
    pub fn end_unix(&self) -> i64 {
        self.end_unix
    }

    /// Day window the unit was generated from
    pub fn window(&self) -> DayWindow {
        DayWindow {
            date: self.date,
            start_unix: self.start_unix,
            end_unix: self.end_unix,
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_id, self.date.format("%Y-%m-%d"))
    }
}
