//! Device registry
//!
//! Ordered, read-only mapping of device serial to display name, supplied once
//! at startup either inline from the config file or from a CSV export with a
//! serial column and a name column.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Default CSV column holding device serials
pub const DEFAULT_SERIAL_COLUMN: &str = "SN";

/// Default CSV column holding display names
pub const DEFAULT_NAME_COLUMN: &str = "Connected Plant";

/// One device to collect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    serial: String,
    name: String,
}

impl Device {
    /// Create a device
    pub fn new(serial: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            name: name.into(),
        }
    }

    /// Device serial (identifier used by the API and the checkpoint)
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered set of devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    /// Build a registry, keeping the first entry for duplicate serials.
    ///
    /// Serials and names are trimmed; an empty name falls back to the serial.
    pub fn from_devices(devices: Vec<Device>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(devices.len());

        for (index, device) in devices.into_iter().enumerate() {
            let serial = device.serial.trim().to_string();
            if serial.is_empty() {
                return Err(RegistryError::EmptySerial { entry: index + 1 });
            }
            let name = match device.name.trim() {
                "" => serial.clone(),
                name => name.to_string(),
            };
            if !seen.insert(serial.clone()) {
                warn!(serial = %serial, name = %name, "Duplicate device serial, keeping first entry");
                continue;
            }
            kept.push(Device { serial, name });
        }

        if kept.is_empty() {
            return Err(RegistryError::Empty);
        }

        debug!(devices = kept.len(), "Device registry loaded");
        Ok(Self { devices: kept })
    }

    /// Load a registry from a CSV file with a header row.
    pub fn from_csv_path(
        path: &Path,
        serial_column: &str,
        name_column: &str,
    ) -> Result<Self, RegistryError> {
        let file = std::fs::File::open(path).map_err(|e| RegistryError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_csv_reader(file, serial_column, name_column)
    }

    /// Load a registry from CSV data with a header row.
    pub fn from_csv_reader<R: Read>(
        reader: R,
        serial_column: &str,
        name_column: &str,
    ) -> Result<Self, RegistryError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| RegistryError::Csv(e.to_string()))?
            .clone();
        let column = |wanted: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}') == wanted)
                .ok_or_else(|| RegistryError::MissingColumn(wanted.to_string()))
        };
        let serial_idx = column(serial_column)?;
        let name_idx = column(name_column)?;

        let mut devices = Vec::new();
        for record in csv_reader.records() {
            let record = record.map_err(|e| RegistryError::Csv(e.to_string()))?;
            let serial = record.get(serial_idx).unwrap_or_default();
            // Skip fully blank spreadsheet rows
            if serial.is_empty() && record.iter().all(str::is_empty) {
                continue;
            }
            let name = record.get(name_idx).unwrap_or_default();
            devices.push(Device::new(serial, name));
        }

        Self::from_devices(devices)
    }

    /// Reorder devices by display name, ties kept in load order
    pub fn sorted_by_name(mut self) -> Self {
        self.devices.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }

    /// Look up a device by serial
    pub fn get(&self, serial: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.serial == serial)
    }

    /// Devices in registry order
    pub fn iter(&self) -> std::slice::Iter<'_, Device> {
        self.devices.iter()
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Always false; an empty registry is rejected at construction
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl<'a> IntoIterator for &'a DeviceRegistry {
    type Item = &'a Device;
    type IntoIter = std::slice::Iter<'a, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Registry file could not be read
    #[error("failed to read device registry {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// OS error
        message: String,
    },

    /// CSV decoding failed
    #[error("invalid device registry CSV: {0}")]
    Csv(String),

    /// Required header missing
    #[error("device registry is missing column '{0}'")]
    MissingColumn(String),

    /// An entry has no serial
    #[error("device entry {entry} has an empty serial")]
    EmptySerial {
        /// 1-based entry number
        entry: usize,
    },

    /// No devices were supplied
    #[error("device registry is empty")]
    Empty,
}
