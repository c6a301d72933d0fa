//! Output path layout
//!
//! One file per device-day: `{root}/{YYYY-MM}/{name}_{serial}/{YYYY-MM-DD}.csv`.

use crate::registry::Device;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Path of the CSV file holding `device`'s data for `date`
pub fn unit_file_path(root: &Path, device: &Device, date: NaiveDate) -> PathBuf {
    root.join(date.format("%Y-%m").to_string())
        .join(device_dir_name(device))
        .join(format!("{}.csv", date.format("%Y-%m-%d")))
}

/// Directory name for a device: `{name}_{serial}`, both sanitized
pub fn device_dir_name(device: &Device) -> String {
    format!(
        "{}_{}",
        sanitize_component(device.name()),
        sanitize_component(device.serial())
    )
}

/// Make `raw` safe as a single path component.
///
/// Separators, reserved characters and control characters become `_`,
/// whitespace runs collapse to a single `_`, and leading dots are dropped.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = false;
    for c in raw.trim().chars() {
        let mapped = if c.is_whitespace()
            || c.is_control()
            || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
        {
            '_'
        } else {
            c
        };
        if mapped == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_start_matches('.').trim_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}
