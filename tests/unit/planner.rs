use chrono::{FixedOffset, NaiveDate};
use device_data_collector::downloader::{remaining_devices, remaining_units};
use device_data_collector::registry::{Device, DeviceRegistry};
use device_data_collector::resume::{CheckpointStore, PersistPolicy};
use device_data_collector::DateRange;
use tempfile::TempDir;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
}

fn range() -> DateRange {
    // Leap-year February end
    DateRange::new(day(27), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), FixedOffset::east_opt(7200).unwrap())
        .unwrap()
}

#[test]
fn remaining_units_shrink_as_units_complete() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path().join("progress.json"), PersistPolicy::default());
    store.load().unwrap();

    let all = remaining_units(&store, "A", &range());
    assert_eq!(all.len(), 4);
    assert_eq!(all[2].date(), day(29));
    assert_eq!(all[0].end_unix() + 1, all[1].start_unix());

    store.mark_unit_complete(0, "A", day(28)).unwrap();
    store.mark_unit_complete(0, "A", day(29)).unwrap();
    let rest: Vec<_> = remaining_units(&store, "A", &range())
        .iter()
        .map(|u| u.date())
        .collect();
    assert_eq!(rest, vec![day(27), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()]);

    // Other devices are unaffected
    assert_eq!(remaining_units(&store, "B", &range()).len(), 4);
}

#[test]
fn remaining_devices_keep_registry_order_and_index() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path().join("progress.json"), PersistPolicy::default());
    store.load().unwrap();
    let registry = DeviceRegistry::from_devices(vec![
        Device::new("C", "Charlie"),
        Device::new("A", "Alpha"),
        Device::new("B", "Bravo"),
    ])
    .unwrap();

    store.mark_device_complete("A").unwrap();
    let remaining: Vec<_> = remaining_devices(&store, &registry)
        .into_iter()
        .map(|(i, d)| (i, d.serial().to_string()))
        .collect();
    assert_eq!(remaining, vec![(0, "C".to_string()), (2, "B".to_string())]);
}
