//! Resume capability for collection runs
//!
//! Durable per-unit and per-device completion state with atomic writes and
//! a run lock.

pub mod checkpoint;
pub mod lock;
pub mod store;

pub use checkpoint::{Checkpoint, Cursor, SCHEMA_VERSION};
pub use lock::ResumeLock;
pub use store::{CheckpointStore, PersistPolicy, ResumeError};
