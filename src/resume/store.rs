//! Checkpoint persistence and in-memory mirror
//!
//! Every mutation is applied to a copy of the mirror, written with an atomic
//! temp-file + fsync + rename, and only then installed as the new mirror. The
//! mirror therefore always equals the last successfully persisted state.

use super::checkpoint::{Checkpoint, SCHEMA_VERSION};
use crate::DateRange;
use chrono::NaiveDate;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::{NamedTempFile, PersistError};
use tracing::{debug, info, warn};

/// Maximum allowed checkpoint file size (64 MB) to prevent memory exhaustion
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 64 * 1024 * 1024;

const TEMP_PREFIX: &str = ".checkpoint-";
const TEMP_SUFFIX: &str = ".tmp";

/// Moves a synced temp file over the checkpoint target.
///
/// On failure the temp file is handed back so the rename can be retried.
pub type RenameFn = fn(NamedTempFile, &Path) -> Result<(), PersistError>;

/// Default [`RenameFn`]: an atomic rename within the target's directory.
pub fn rename_into_place(temp: NamedTempFile, target: &Path) -> Result<(), PersistError> {
    temp.persist(target).map(|_| ())
}

/// Retry policy for the rename step of a persist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistPolicy {
    /// Total rename attempts before giving up
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl PersistPolicy {
    /// Delay after failed attempt number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Durable, crash-safe completion state
pub struct CheckpointStore {
    path: PathBuf,
    policy: PersistPolicy,
    rename: RenameFn,
    mirror: Mutex<Checkpoint>,
}

impl CheckpointStore {
    /// Create a store backed by `path` with an empty mirror.
    ///
    /// Nothing is read until [`CheckpointStore::load`] is called.
    pub fn new(path: impl Into<PathBuf>, policy: PersistPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            rename: rename_into_place,
            mirror: Mutex::new(Checkpoint::new()),
        }
    }

    /// Replace the final rename step of every persist.
    pub fn with_rename(mut self, rename: RenameFn) -> Self {
        self.rename = rename;
        self
    }

    /// Path of the checkpoint file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load durable state into the mirror.
    ///
    /// Returns `Ok(None)` when no checkpoint exists yet. A file that exists
    /// but cannot be decoded is an error, never an empty start.
    pub fn load(&self) -> Result<Option<Checkpoint>, ResumeError> {
        let loaded = read_checkpoint(&self.path)?;
        if let Some(checkpoint) = &loaded {
            info!(
                path = %self.path.display(),
                started_at = %checkpoint.started_at(),
                last_updated = ?checkpoint.last_updated(),
                completed_devices = checkpoint.completed_devices().len(),
                completed_units = checkpoint.total_units(),
                cursor_device = ?checkpoint.cursor().device_id,
                cursor_day = ?checkpoint.cursor().day,
                "Resuming from checkpoint"
            );
            *self.guard() = checkpoint.clone();
        } else {
            debug!(path = %self.path.display(), "No checkpoint found, starting fresh");
        }
        Ok(loaded)
    }

    /// Copy of the current mirror
    pub fn snapshot(&self) -> Checkpoint {
        self.guard().clone()
    }

    /// Whether the (device, day) unit is complete
    pub fn is_unit_complete(&self, device: &str, day: NaiveDate) -> bool {
        self.guard().is_unit_complete(device, day)
    }

    /// Whether the device is marked fully processed
    pub fn is_device_complete(&self, device: &str) -> bool {
        self.guard().is_device_complete(device)
    }

    /// Number of days of `range` complete for `device`
    pub fn days_complete_in(&self, device: &str, range: &DateRange) -> usize {
        self.guard().days_complete_in(device, range)
    }

    /// Whether every day of `range` is complete for `device`
    pub fn covers(&self, device: &str, range: &DateRange) -> bool {
        self.guard().covers(device, range)
    }

    /// Durably record a completed unit.
    ///
    /// Returns `Ok(false)` without writing when the unit was already complete.
    pub fn mark_unit_complete(
        &self,
        device_index: usize,
        device: &str,
        day: NaiveDate,
    ) -> Result<bool, ResumeError> {
        self.commit(|checkpoint| {
            let inserted = checkpoint.record_unit(device, day);
            if inserted {
                checkpoint.set_cursor(device_index, device, day);
            }
            inserted
        })
    }

    /// Durably record a fully processed device.
    pub fn mark_device_complete(&self, device: &str) -> Result<bool, ResumeError> {
        self.commit(|checkpoint| checkpoint.record_device(device))
    }

    /// Durably drop a device completion claim. Unit keys are never removed.
    pub fn revoke_device(&self, device: &str) -> Result<bool, ResumeError> {
        self.commit(|checkpoint| checkpoint.revoke_device(device))
    }

    /// Write the current mirror to disk.
    pub fn persist(&self) -> Result<(), ResumeError> {
        let mirror = self.guard();
        write_checkpoint_with(&self.path, &mirror, &self.policy, self.rename)
    }

    fn commit<F>(&self, mutate: F) -> Result<bool, ResumeError>
    where
        F: FnOnce(&mut Checkpoint) -> bool,
    {
        // The lock is held across the write so two persists never race on the
        // same temp/target pair.
        let mut mirror = self.guard();
        let mut next = mirror.clone();
        if !mutate(&mut next) {
            return Ok(false);
        }
        next.touch();
        write_checkpoint_with(&self.path, &next, &self.policy, self.rename)?;
        *mirror = next;
        Ok(true)
    }

    fn guard(&self) -> MutexGuard<'_, Checkpoint> {
        // The mirror is only replaced after a successful write, so a poisoned
        // guard still holds a persisted state.
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Read a checkpoint file, `Ok(None)` if it does not exist.
pub fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>, ResumeError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ResumeError::IoError(e.to_string())),
    };

    if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
        return Err(ResumeError::StateTooLarge {
            size: metadata.len(),
            max: MAX_CHECKPOINT_FILE_SIZE,
        });
    }

    let contents = std::fs::read(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    let checkpoint: Checkpoint = serde_json::from_slice(&contents).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to deserialize checkpoint");
        ResumeError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    match checkpoint.schema_version() {
        0 => Err(ResumeError::Corrupt {
            path: path.to_path_buf(),
            reason: "schema_version must be at least 1".to_string(),
        }),
        found if found > SCHEMA_VERSION => {
            warn!(
                found_version = found,
                expected_version = SCHEMA_VERSION,
                "Checkpoint was written by a newer schema"
            );
            Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found,
            })
        }
        _ => Ok(Some(checkpoint)),
    }
}

/// Atomically replace `path` with the serialized `checkpoint`.
///
/// The temp file lives in the target's directory so the final rename never
/// crosses filesystems.
pub fn write_checkpoint(
    path: &Path,
    checkpoint: &Checkpoint,
    policy: &PersistPolicy,
) -> Result<(), ResumeError> {
    write_checkpoint_with(path, checkpoint, policy, rename_into_place)
}

/// [`write_checkpoint`] with a custom final rename step.
///
/// Transient rename errors are retried up to `policy.max_attempts` times in
/// total; the target is only ever replaced by `rename`.
pub fn write_checkpoint_with(
    path: &Path,
    checkpoint: &Checkpoint,
    policy: &PersistPolicy,
    rename: RenameFn,
) -> Result<(), ResumeError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;

    let json = serde_json::to_vec_pretty(checkpoint)
        .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

    let mut temp_file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;

    temp_file
        .write_all(&json)
        .map_err(|e| ResumeError::IoError(format!("Failed to write temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match rename(temp_file, path) {
            Ok(()) => break,
            Err(e) => {
                if attempt >= max_attempts || !is_transient(&e.error) {
                    return Err(ResumeError::Persist {
                        attempts: attempt,
                        source: e.error,
                    });
                }
                let delay = policy.backoff(attempt - 1);
                warn!(
                    path = %path.display(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e.error,
                    "Checkpoint rename failed, retrying"
                );
                crate::metrics::record_persist_retry();
                std::thread::sleep(delay);
                temp_file = e.file;
            }
        }
    }

    // Fsync the directory so the rename itself is durable
    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    debug!(
        path = %path.display(),
        completed_devices = checkpoint.completed_devices().len(),
        completed_units = checkpoint.total_units(),
        "Checkpoint saved"
    );
    Ok(())
}

fn is_transient(error: &io::Error) -> bool {
    if matches!(
        error.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    ) {
        return true;
    }
    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    #[cfg(windows)]
    if let Some(code) = error.raw_os_error() {
        return code == 32 || code == 33;
    }
    false
}

/// Errors related to checkpoint state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Checkpoint exists but cannot be decoded
    #[error("checkpoint {path} is corrupt: {reason}")]
    Corrupt {
        /// Checkpoint file path
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// Checkpoint was written by a newer schema
    #[error("schema version mismatch: supports up to {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Highest supported schema version
        expected: u32,
        /// Found schema version
        found: u32,
    },

    /// Checkpoint file too large
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Atomic rename failed after retries
    #[error("failed to persist checkpoint after {attempts} attempt(s): {source}")]
    Persist {
        /// Rename attempts made
        attempts: u32,
        /// Last rename error
        #[source]
        source: io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
