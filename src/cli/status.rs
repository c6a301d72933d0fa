//! Status command: per-device progress read from the checkpoint

use super::{load_config, print_json, Cli, CliError, OutputFormat};
use crate::registry::DeviceRegistry;
use crate::resume::store::read_checkpoint;
use crate::resume::Checkpoint;
use crate::DateRange;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Only list devices that are not complete
    #[arg(long, default_value_t = false)]
    pub incomplete_only: bool,
}

/// Progress of one registry device against the configured range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    /// Device serial
    pub serial: String,
    /// Display name
    pub name: String,
    /// Device claimed complete in the checkpoint and every day of the range recorded
    pub complete: bool,
    /// Days of the range recorded complete
    pub days_done: usize,
    /// Days in the range
    pub days_total: usize,
}

/// Checkpoint summary for the configured registry and range
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Checkpoint file
    pub checkpoint: PathBuf,
    /// Whether the checkpoint file exists
    pub exists: bool,
    /// First run start time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Last persist time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Devices complete
    pub devices_complete: usize,
    /// Units recorded across all devices
    pub units_recorded: usize,
    /// Per-device progress
    pub devices: Vec<DeviceStatus>,
}

/// Build a status report from a checkpoint (or its absence).
pub fn build_report(
    path: PathBuf,
    checkpoint: Option<&Checkpoint>,
    registry: &DeviceRegistry,
    range: &DateRange,
) -> StatusReport {
    let devices: Vec<DeviceStatus> = registry
        .iter()
        .map(|device| DeviceStatus {
            serial: device.serial().to_string(),
            name: device.name().to_string(),
            complete: checkpoint.is_some_and(|c| {
                c.is_device_complete(device.serial()) && c.covers(device.serial(), range)
            }),
            days_done: checkpoint.map_or(0, |c| c.days_complete_in(device.serial(), range)),
            days_total: range.num_days(),
        })
        .collect();

    StatusReport {
        checkpoint: path,
        exists: checkpoint.is_some(),
        started_at: checkpoint.map(Checkpoint::started_at),
        last_updated: checkpoint.and_then(Checkpoint::last_updated),
        devices_complete: devices.iter().filter(|d| d.complete).count(),
        units_recorded: checkpoint.map_or(0, Checkpoint::total_units),
        devices,
    }
}

impl StatusArgs {
    /// Print progress without fetching.
    pub async fn execute(&self, cli: &Cli) -> Result<StatusReport, CliError> {
        let config = load_config(&cli.config)?;
        config.validate()?;
        let range = config.date_range()?;
        let registry = config.load_registry()?;

        let path = config.checkpoint.path.clone();
        let checkpoint = read_checkpoint(&path)?;
        let mut report = build_report(path, checkpoint.as_ref(), &registry, &range);
        if self.incomplete_only {
            report.devices.retain(|d| !d.complete);
        }

        match cli.output_format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Human => print_human(&report, &range),
        }
        Ok(report)
    }
}

fn print_human(report: &StatusReport, range: &DateRange) {
    println!("Checkpoint: {}", report.checkpoint.display());
    if !report.exists {
        println!("No checkpoint yet - nothing collected.");
    }
    if let Some(started) = report.started_at {
        println!("Started: {started}");
    }
    if let Some(updated) = report.last_updated {
        println!("Last updated: {updated}");
    }
    println!("Range: {} to {} ({} days)", range.start(), range.end(), range.num_days());
    println!(
        "Devices complete: {} | Units recorded: {}",
        report.devices_complete, report.units_recorded
    );
    for device in &report.devices {
        let marker = if device.complete { "done" } else { "    " };
        println!(
            "  [{marker}] {} ({}): {}/{} days",
            device.name, device.serial, device.days_done, device.days_total
        );
    }
}
