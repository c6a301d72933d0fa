//! Shared doubles and builders for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, Utc};
use device_data_collector::downloader::{Coordinator, FetchExecutor, RetryPolicy};
use device_data_collector::fetcher::{
    Attribute, Credential, DataRecord, DeviceFetcher, DevicePayload, FetcherError, FetcherResult,
};
use device_data_collector::output::{OutputError, OutputResult, UnitSink};
use device_data_collector::registry::{Device, DeviceRegistry};
use device_data_collector::resume::{CheckpointStore, PersistPolicy};
use device_data_collector::shutdown::SharedShutdown;
use device_data_collector::{DateRange, DayWindow, WorkUnit};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

type Key = (String, NaiveDate);

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
}

pub fn offset() -> FixedOffset {
    FixedOffset::east_opt(2 * 3600).unwrap()
}

pub fn range(first: u32, last: u32) -> DateRange {
    DateRange::new(day(first), day(last), offset()).unwrap()
}

pub fn registry(serials: &[&str]) -> DeviceRegistry {
    DeviceRegistry::from_devices(
        serials
            .iter()
            .map(|s| Device::new(*s, format!("Plant {s}")))
            .collect(),
    )
    .unwrap()
}

pub fn credential() -> Credential {
    Credential::new("test-token", Utc::now() + chrono::Duration::hours(1))
}

pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        request_timeout: Duration::from_secs(5),
    }
}

pub fn checkpoint_path(dir: &Path) -> PathBuf {
    dir.join("checkpoints").join("progress.json")
}

/// Build a coordinator over a checkpoint in `dir`.
#[allow(clippy::too_many_arguments)]
pub fn coordinator(
    dir: &Path,
    registry: DeviceRegistry,
    range: DateRange,
    fetcher: Arc<ScriptedFetcher>,
    sink: Arc<dyn UnitSink>,
    shutdown: SharedShutdown,
    concurrency: usize,
    max_retries: u32,
) -> Coordinator {
    let store = CheckpointStore::new(checkpoint_path(dir), PersistPolicy::default());
    coordinator_with_store(store, registry, range, fetcher, sink, shutdown, concurrency, max_retries)
}

/// Build a coordinator over an already configured store.
#[allow(clippy::too_many_arguments)]
pub fn coordinator_with_store(
    store: CheckpointStore,
    registry: DeviceRegistry,
    range: DateRange,
    fetcher: Arc<ScriptedFetcher>,
    sink: Arc<dyn UnitSink>,
    shutdown: SharedShutdown,
    concurrency: usize,
    max_retries: u32,
) -> Coordinator {
    let executor = FetchExecutor::new(fetcher, fast_policy(max_retries), concurrency, shutdown.clone());
    Coordinator::new(registry, range, store, executor, sink, shutdown)
}

/// Fetcher answering from per-unit scripts, then a default one-record payload
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<Key, VecDeque<FetcherResult<DevicePayload>>>>,
    persistent: Mutex<HashMap<Key, FetcherError>>,
    calls: Mutex<HashMap<Key, u32>>,
    trigger: Mutex<Option<(Key, SharedShutdown)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue results returned, in order, for the first calls on a unit
    pub fn script(&self, serial: &str, date: NaiveDate, results: Vec<FetcherResult<DevicePayload>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((serial.to_string(), date), results.into());
    }

    /// Fail every call on a unit with `error`
    pub fn always_fail(&self, serial: &str, date: NaiveDate, error: FetcherError) {
        self.persistent
            .lock()
            .unwrap()
            .insert((serial.to_string(), date), error);
    }

    /// Trigger `shutdown` while serving the given unit
    pub fn trigger_shutdown_on(&self, serial: &str, date: NaiveDate, shutdown: SharedShutdown) {
        *self.trigger.lock().unwrap() = Some(((serial.to_string(), date), shutdown));
    }

    pub fn calls(&self, serial: &str, date: NaiveDate) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&(serial.to_string(), date))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

pub fn payload_for(unit: &WorkUnit) -> DevicePayload {
    DevicePayload::new(vec![DataRecord {
        collect_time: unit.start_unix() + 300,
        attributes: vec![Attribute {
            name: "Power".to_string(),
            value: Some("1.5".to_string()),
            unit: Some("kW".to_string()),
        }],
    }])
}

#[async_trait]
impl DeviceFetcher for ScriptedFetcher {
    async fn fetch_day(&self, _credential: &Credential, unit: &WorkUnit) -> FetcherResult<DevicePayload> {
        let key = (unit.device_id().to_string(), unit.date());
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;

        if let Some((trigger_key, shutdown)) = self.trigger.lock().unwrap().as_ref() {
            if *trigger_key == key {
                shutdown.trigger();
            }
        }

        if let Some(result) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }
        if let Some(error) = self.persistent.lock().unwrap().get(&key) {
            return Err(error.clone());
        }
        Ok(payload_for(unit))
    }
}

/// Sink recording accepted units, optionally rejecting some
#[derive(Default)]
pub struct RecordingSink {
    accepted: Mutex<Vec<Key>>,
    reject: Mutex<HashSet<Key>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject(&self, serial: &str, date: NaiveDate) {
        self.reject.lock().unwrap().insert((serial.to_string(), date));
    }

    pub fn accepted(&self) -> Vec<(String, NaiveDate)> {
        let mut accepted = self.accepted.lock().unwrap().clone();
        accepted.sort();
        accepted
    }
}

impl UnitSink for RecordingSink {
    fn accept(&self, device: &Device, day: &DayWindow, _payload: &DevicePayload) -> OutputResult<()> {
        let key = (device.serial().to_string(), day.date());
        if self.reject.lock().unwrap().contains(&key) {
            return Err(OutputError::IoError("disk full".to_string()));
        }
        self.accepted.lock().unwrap().push(key);
        Ok(())
    }
}

/// Sink that holds one day's write until another day has been written
pub struct GatedSink {
    hold: NaiveDate,
    release: NaiveDate,
    released: Mutex<bool>,
    wake: Condvar,
    order: Mutex<Vec<NaiveDate>>,
}

impl GatedSink {
    pub fn new(hold: NaiveDate, release: NaiveDate) -> Arc<Self> {
        Arc::new(Self {
            hold,
            release,
            released: Mutex::new(false),
            wake: Condvar::new(),
            order: Mutex::new(Vec::new()),
        })
    }

    /// Days in the order their writes finished
    pub fn order(&self) -> Vec<NaiveDate> {
        self.order.lock().unwrap().clone()
    }
}

impl UnitSink for GatedSink {
    fn accept(&self, _device: &Device, day: &DayWindow, _payload: &DevicePayload) -> OutputResult<()> {
        if day.date() == self.hold {
            let released = self.released.lock().unwrap();
            let (released, timeout) = self
                .wake
                .wait_timeout_while(released, Duration::from_secs(5), |released| !*released)
                .unwrap();
            if timeout.timed_out() && !*released {
                return Err(OutputError::IoError("held write was never released".to_string()));
            }
        }
        self.order.lock().unwrap().push(day.date());
        if day.date() == self.release {
            *self.released.lock().unwrap() = true;
            self.wake.notify_all();
        }
        Ok(())
    }
}
