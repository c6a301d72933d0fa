//! Collection orchestration
//!
//! # Overview
//!
//! 1. **Planning**: [`plan`] computes remaining devices and (device, day) units
//!    from the checkpoint.
//! 2. **Fetching**: [`executor::FetchExecutor`] runs one device's units under a
//!    bounded pool with per-attempt timeout, retry and capped backoff.
//! 3. **Coordination**: [`coordinator::Coordinator`] hands each success to the
//!    sink, marks it complete, and marks a device complete once its range is
//!    covered.
//! 4. **Progress**: [`progress::ProgressState`] formats periodic progress lines.
//!
//! # Error Handling
//!
//! - Retryable fetch errors (5xx, timeout, connection failure) never leave the
//!   executor.
//! - Terminal unit failures are recorded in [`RunSummary`] and leave the unit
//!   pending for the next run.
//! - Checkpoint failures surface as [`CollectError`] and abort the run.

pub mod config;
pub mod coordinator;
pub mod executor;
pub mod plan;
pub mod progress;

pub use config::RetryPolicy;
pub use coordinator::{CollectError, Coordinator, DeviceProgress, RunSummary, UnitFailureRecord};
pub use executor::{FetchExecutor, FetchResult, UnitFailure};
pub use plan::{remaining_devices, remaining_units};
pub use progress::ProgressState;
