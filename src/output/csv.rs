//! CSV sink writing one file per device-day

use super::path::unit_file_path;
use super::{OutputError, OutputResult, UnitSink};
use crate::fetcher::DevicePayload;
use crate::registry::Device;
use crate::DayWindow;
use chrono::{DateTime, FixedOffset, Timelike};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::debug;

/// Attribute columns dropped unless configured otherwise
pub const DEFAULT_EXCLUDED_COLUMNS: &[&str] = &["Battery Mode"];

const FIXED_COLUMNS: [&str; 3] = ["Time", "Unix_Time", "Hour"];

/// Writes `{root}/{YYYY-MM}/{name}_{serial}/{YYYY-MM-DD}.csv` per unit.
///
/// Each file is written to a temp file and renamed into place, so rewriting
/// a day replaces it whole. Days without records produce no file.
#[derive(Debug, Clone)]
pub struct CsvUnitSink {
    root: PathBuf,
    offset: FixedOffset,
    excluded: HashSet<String>,
}

impl CsvUnitSink {
    /// Create a sink under `root`, rendering local times in `offset`
    pub fn new(root: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            root: root.into(),
            offset,
            excluded: DEFAULT_EXCLUDED_COLUMNS
                .iter()
                .map(|c| clean_column_name(c))
                .collect(),
        }
    }

    /// Replace the excluded attribute columns
    pub fn with_excluded_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded = columns
            .into_iter()
            .map(|c| clean_column_name(c.as_ref()))
            .collect();
        self
    }

    fn build_table(&self, payload: &DevicePayload) -> OutputResult<(Vec<String>, Vec<Vec<String>>)> {
        let mut columns: Vec<String> = Vec::new();
        let mut column_index: HashMap<String, usize> = HashMap::new();
        let mut records: Vec<_> = payload.records.iter().collect();
        records.sort_by_key(|r| r.collect_time);

        let mut cells: Vec<(i64, HashMap<usize, String>)> = Vec::with_capacity(records.len());
        for record in records {
            let mut row = HashMap::new();
            for attribute in &record.attributes {
                let name = clean_column_name(&attribute.name);
                if name.is_empty() || self.excluded.contains(&name) {
                    continue;
                }
                let next = columns.len();
                let idx = *column_index.entry(name.clone()).or_insert_with(|| {
                    columns.push(name);
                    next
                });
                row.insert(idx, attribute.value.clone().unwrap_or_default());
            }
            cells.push((record.collect_time, row));
        }

        let mut rows = Vec::with_capacity(cells.len());
        for (collect_time, mut row) in cells {
            let local = DateTime::from_timestamp(collect_time, 0)
                .ok_or(OutputError::InvalidTimestamp(collect_time))?
                .with_timezone(&self.offset);
            let mut line = Vec::with_capacity(FIXED_COLUMNS.len() + columns.len());
            line.push(local.format("%Y-%m-%d %H:%M:%S").to_string());
            line.push(collect_time.to_string());
            line.push(local.hour().to_string());
            line.extend((0..columns.len()).map(|i| row.remove(&i).unwrap_or_default()));
            rows.push(line);
        }

        let header = FIXED_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(columns)
            .collect();
        Ok((header, rows))
    }
}

impl UnitSink for CsvUnitSink {
    fn accept(&self, device: &Device, day: &DayWindow, payload: &DevicePayload) -> OutputResult<()> {
        if payload.is_empty() {
            debug!(device = %device.serial(), day = %day, "No records, skipping file");
            return Ok(());
        }

        let path = unit_file_path(&self.root, device, day.date());
        let dir = path
            .parent()
            .ok_or_else(|| OutputError::IoError(format!("no parent for {}", path.display())))?;
        std::fs::create_dir_all(dir).map_err(|e| OutputError::IoError(e.to_string()))?;

        let (header, rows) = self.build_table(payload)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".unit-")
            .suffix(".csv.tmp")
            .tempfile_in(dir)
            .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {e}")))?;
        {
            let mut writer = csv::Writer::from_writer(temp.as_file_mut());
            writer
                .write_record(&header)
                .map_err(|e| OutputError::CsvError(e.to_string()))?;
            for row in &rows {
                writer
                    .write_record(row)
                    .map_err(|e| OutputError::CsvError(e.to_string()))?;
            }
            writer
                .flush()
                .map_err(|e| OutputError::IoError(e.to_string()))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| OutputError::IoError(e.to_string()))?;
        temp.persist(&path)
            .map_err(|e| OutputError::IoError(format!("Failed to persist {}: {}", path.display(), e.error)))?;

        debug!(
            device = %device.serial(),
            day = %day,
            rows = rows.len(),
            path = %path.display(),
            "Wrote unit CSV"
        );
        Ok(())
    }
}

/// Normalise an attribute name into a column header.
///
/// Non-breaking spaces become spaces, runs of spaces collapse, and non-ASCII
/// characters are dropped.
pub fn clean_column_name(raw: &str) -> String {
    let ascii: String = raw
        .replace('\u{a0}', " ")
        .chars()
        .filter(char::is_ascii)
        .collect();
    ascii.split_whitespace().collect::<Vec<_>>().join(" ")
}
