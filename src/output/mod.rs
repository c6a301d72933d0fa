//! Unit payload sinks
//!
//! A sink receives each successful unit's payload before the unit is marked
//! complete. Accepting the same unit twice must leave the same result as
//! accepting it once.

use crate::fetcher::DevicePayload;
use crate::registry::Device;
use crate::DayWindow;

pub mod csv;
pub mod path;

pub use self::csv::{CsvUnitSink, DEFAULT_EXCLUDED_COLUMNS};
pub use path::{device_dir_name, sanitize_component, unit_file_path};

/// Output errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Record timestamp outside the representable range
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Consumer of completed unit payloads
pub trait UnitSink: Send + Sync {
    /// Store `payload` for `device` on `day`. Must be idempotent per (device, day).
    fn accept(&self, device: &Device, day: &DayWindow, payload: &DevicePayload) -> OutputResult<()>;
}
