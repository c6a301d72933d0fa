//! Run lock for a checkpoint file
//!
//! Advisory exclusive lock via fd-lock on `<checkpoint>.lock`, held for the
//! lifetime of a run so two processes never write the same checkpoint.

use super::store::ResumeError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock held while a run owns a checkpoint
#[derive(Debug)]
pub struct ResumeLock {
    _lock: RwLock<File>,
    path: PathBuf,
}

impl ResumeLock {
    /// Try to take the lock for `checkpoint_path` without blocking.
    pub fn try_acquire(checkpoint_path: &Path) -> Result<Self, ResumeError> {
        if let Some(parent) = checkpoint_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ResumeError::IoError(e.to_string()))?;
            }
        }

        let lock_path = checkpoint_path.with_extension("lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        let guard = lock.try_write().map_err(|e| {
            ResumeError::LockError(format!(
                "checkpoint {} is in use by another run: {e}",
                checkpoint_path.display()
            ))
        })?;
        // Keep the OS lock; it is released when the file handle closes on drop.
        std::mem::forget(guard);

        debug!(path = %lock_path.display(), "Acquired checkpoint lock");
        Ok(Self {
            _lock: lock,
            path: lock_path,
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
