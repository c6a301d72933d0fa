//! Checkpoint record for resume capability
//!
//! The record is versioned JSON: unknown fields are ignored on load and every
//! field added after version 1 must carry a serde default.

use crate::DateRange;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Current checkpoint schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Durable progress record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    schema_version: u32,
    #[serde(default)]
    completed_devices: BTreeSet<String>,
    #[serde(default)]
    completed_units: BTreeMap<String, BTreeSet<NaiveDate>>,
    #[serde(default)]
    cursor: Cursor,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
}

/// Last position touched by a run (informational only)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Index of the device in the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_index: Option<usize>,
    /// Device identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Day of the last completed unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<NaiveDate>,
}

impl Checkpoint {
    /// Create an empty checkpoint stamped with the current time
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            completed_devices: BTreeSet::new(),
            completed_units: BTreeMap::new(),
            cursor: Cursor::default(),
            started_at: Utc::now(),
            last_updated: None,
        }
    }

    /// Schema version the record was written with
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Devices fully processed
    pub fn completed_devices(&self) -> &BTreeSet<String> {
        &self.completed_devices
    }

    /// Completed days for `device`, if any
    pub fn completed_days(&self, device: &str) -> Option<&BTreeSet<NaiveDate>> {
        self.completed_units.get(device)
    }

    /// Whether the (device, day) unit is complete
    pub fn is_unit_complete(&self, device: &str, day: NaiveDate) -> bool {
        self.completed_units
            .get(device)
            .is_some_and(|days| days.contains(&day))
    }

    /// Whether the device is marked fully processed
    pub fn is_device_complete(&self, device: &str) -> bool {
        self.completed_devices.contains(device)
    }

    /// Number of days of `range` complete for `device`
    pub fn days_complete_in(&self, device: &str, range: &DateRange) -> usize {
        self.completed_units
            .get(device)
            .map(|days| days.range(range.start()..=range.end()).count())
            .unwrap_or(0)
    }

    /// Whether every day of `range` is complete for `device`
    pub fn covers(&self, device: &str, range: &DateRange) -> bool {
        self.days_complete_in(device, range) == range.num_days()
    }

    /// Total number of completed units across devices
    pub fn total_units(&self) -> usize {
        self.completed_units.values().map(BTreeSet::len).sum()
    }

    /// Last position touched
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// When the checkpoint was first created
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the checkpoint was last written
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Record a completed unit. Returns `false` if it was already recorded.
    pub(crate) fn record_unit(&mut self, device: &str, day: NaiveDate) -> bool {
        self.completed_units
            .entry(device.to_string())
            .or_default()
            .insert(day)
    }

    /// Record a completed device. Returns `false` if it was already recorded.
    pub(crate) fn record_device(&mut self, device: &str) -> bool {
        self.completed_devices.insert(device.to_string())
    }

    /// Drop a device completion claim; unit keys are kept.
    pub(crate) fn revoke_device(&mut self, device: &str) -> bool {
        self.completed_devices.remove(device)
    }

    pub(crate) fn set_cursor(&mut self, device_index: usize, device: &str, day: NaiveDate) {
        self.cursor = Cursor {
            device_index: Some(device_index),
            device_id: Some(device.to_string()),
            day: Some(day),
        };
    }

    pub(crate) fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}
