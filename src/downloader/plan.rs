//! Remaining-work computation
//!
//! Planning is a pure read of the checkpoint mirror: calling it again after
//! more units complete simply yields fewer units.

use crate::registry::{Device, DeviceRegistry};
use crate::resume::CheckpointStore;
use crate::{DateRange, WorkUnit};

/// Registry devices not yet marked complete, in registry order, with their index.
pub fn remaining_devices<'a>(
    store: &CheckpointStore,
    registry: &'a DeviceRegistry,
) -> Vec<(usize, &'a Device)> {
    registry
        .iter()
        .enumerate()
        .filter(|(_, device)| !store.is_device_complete(device.serial()))
        .collect()
}

/// Days of `range` not yet complete for `device`, ordered by day.
pub fn remaining_units(store: &CheckpointStore, device: &str, range: &DateRange) -> Vec<WorkUnit> {
    range
        .days()
        .filter(|window| !store.is_unit_complete(device, window.date()))
        .map(|window| WorkUnit::new(device, window))
        .collect()
}
