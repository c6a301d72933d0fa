//! Progress tracking for a device's days.
//!
//! Calculates completion percentage, rate and estimated time remaining, and
//! formats the periodic `[PROGRESS]` lines emitted while a device runs.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RUN_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_PERCENTAGE_STEP: f64 = 10.0;

/// Progress tracking state for one device.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Device label shown in progress lines.
    pub label: String,
    /// Days resolved so far (completed or failed).
    pub days_resolved: u64,
    /// Days submitted for this device.
    pub days_total: u64,
    /// Records written so far.
    pub records: u64,
    /// Timestamp when the device started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between time-based updates.
    pub update_interval: Duration,
    /// Days resolved per second.
    pub current_rate: f64,
    /// Last reported completion percentage (0-100).
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create a tracker for `days_total` days with default intervals.
    pub fn new(label: impl Into<String>, days_total: u64) -> Self {
        let now = Instant::now();
        Self {
            label: label.into(),
            days_resolved: 0,
            days_total,
            records: 0,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            last_reported_percentage: 0.0,
            min_percentage_step: DEFAULT_PERCENTAGE_STEP,
        }
    }

    /// Record one resolved day and the records it produced.
    pub fn update(&mut self, records: u64) {
        self.days_resolved = self.days_resolved.saturating_add(1);
        self.records = self.records.saturating_add(records);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current_rate = self.days_resolved as f64 / elapsed;
        }
    }

    /// Whether a progress line should be emitted based on time or percentage.
    pub fn should_emit_update(&self) -> bool {
        if self.days_resolved == 0 {
            return false;
        }

        if self.percentage() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }

        self.start_time.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress line.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage();
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.days_total == 0 {
            return 100.0;
        }
        (self.days_resolved as f64 / self.days_total as f64) * 100.0
    }

    /// Estimated time until all submitted days resolve.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.days_total.saturating_sub(self.days_resolved);
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {}: {}/{} days - {:.1}% complete, {} records",
            self.label,
            self.days_resolved,
            self.days_total,
            self.percentage(),
            self.records
        )];

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.2} days/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
