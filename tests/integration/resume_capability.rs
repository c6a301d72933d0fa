//! Checkpoint durability and load-failure behaviour

use super::support::{
    checkpoint_path, coordinator, coordinator_with_store, credential, day, range, registry,
    RecordingSink, ScriptedFetcher,
};
use device_data_collector::downloader::CollectError;
use device_data_collector::resume::store::{read_checkpoint, MAX_CHECKPOINT_FILE_SIZE};
use device_data_collector::resume::{CheckpointStore, PersistPolicy, ResumeError, ResumeLock};
use device_data_collector::shutdown::ShutdownSignal;
use std::fs;
use std::io;
use std::path::Path;
use tempfile::{NamedTempFile, PersistError, TempDir};

async fn run_over(dir: &Path, fetcher: std::sync::Arc<ScriptedFetcher>) -> Result<(), CollectError> {
    coordinator(
        dir,
        registry(&["A"]),
        range(1, 2),
        fetcher,
        RecordingSink::new(),
        ShutdownSignal::shared(),
        2,
        3,
    )
    .run(&credential())
    .await
    .map(|_| ())
}

#[tokio::test]
async fn corrupt_checkpoint_is_fatal_and_untouched() {
    let dir = TempDir::new().unwrap();
    let path = checkpoint_path(dir.path());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"{\"schema_version\": 1, \"completed_units\": [").unwrap();

    let fetcher = ScriptedFetcher::new();
    let err = run_over(dir.path(), fetcher.clone()).await.unwrap_err();

    assert!(matches!(err, CollectError::Checkpoint(ResumeError::Corrupt { .. })));
    assert_eq!(fetcher.total_calls(), 0);
    assert_eq!(
        fs::read(&path).unwrap(),
        b"{\"schema_version\": 1, \"completed_units\": [".to_vec()
    );
}

#[tokio::test]
async fn newer_schema_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = checkpoint_path(dir.path());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        r#"{"schema_version": 99, "completed_devices": [], "completed_units": {}, "started_at": "2025-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let err = run_over(dir.path(), ScriptedFetcher::new()).await.unwrap_err();
    assert!(matches!(
        err,
        CollectError::Checkpoint(ResumeError::SchemaVersionMismatch { found: 99, .. })
    ));
}

#[tokio::test]
async fn oversized_checkpoint_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = checkpoint_path(dir.path());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    // Sparse file: large length without writing the bytes.
    fs::File::create(&path)
        .unwrap()
        .set_len(MAX_CHECKPOINT_FILE_SIZE + 1)
        .unwrap();

    let err = run_over(dir.path(), ScriptedFetcher::new()).await.unwrap_err();
    assert!(matches!(err, CollectError::Checkpoint(ResumeError::StateTooLarge { .. })));
}

#[test]
fn missing_schema_version_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("progress.json");
    fs::write(&path, r#"{"completed_devices": ["A"]}"#).unwrap();
    assert!(matches!(read_checkpoint(&path), Err(ResumeError::Corrupt { .. })));
}

#[test]
fn unknown_fields_are_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("progress.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "completed_devices": ["A"],
            "completed_units": {"A": ["2025-01-01"]},
            "started_at": "2025-01-01T00:00:00Z",
            "written_by": "a future release"
        }"#,
    )
    .unwrap();

    let checkpoint = read_checkpoint(&path).unwrap().unwrap();
    assert!(checkpoint.is_device_complete("A"));
    assert!(checkpoint.is_unit_complete("A", day(1)));
}

/// Leaves the synced temp file on disk and never renames it, as a process
/// killed right before the rename would.
fn killed_before_rename(temp: NamedTempFile, _: &Path) -> Result<(), PersistError> {
    let dir = temp.path().parent().unwrap().to_path_buf();
    let _ = temp.keep();
    Err(PersistError {
        error: io::Error::new(io::ErrorKind::Other, "process killed"),
        file: NamedTempFile::new_in(dir).unwrap(),
    })
}

fn refuse_rename(temp: NamedTempFile, _: &Path) -> Result<(), PersistError> {
    Err(PersistError {
        error: io::Error::new(io::ErrorKind::Other, "read-only filesystem"),
        file: temp,
    })
}

fn stray_temp_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .count()
}

#[test]
fn crash_between_temp_write_and_rename_keeps_previous_state() {
    let dir = TempDir::new().unwrap();
    let path = checkpoint_path(dir.path());

    let store = CheckpointStore::new(&path, PersistPolicy::default());
    store.load().unwrap();
    store.mark_unit_complete(0, "A", day(1)).unwrap();
    let before = fs::read(&path).unwrap();

    let crashing = CheckpointStore::new(&path, PersistPolicy::default()).with_rename(killed_before_rename);
    crashing.load().unwrap();
    assert!(crashing.mark_unit_complete(0, "A", day(2)).is_err());

    // The new state reached disk only as a stray temp file.
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(stray_temp_files(path.parent().unwrap()), 1);

    let reloaded = CheckpointStore::new(&path, PersistPolicy::default());
    let checkpoint = reloaded.load().unwrap().unwrap();
    assert!(checkpoint.is_unit_complete("A", day(1)));
    assert!(!checkpoint.is_unit_complete("A", day(2)));

    // The next persist replaces the target whole.
    reloaded.mark_unit_complete(0, "A", day(2)).unwrap();
    let after = read_checkpoint(&path).unwrap().unwrap();
    assert_eq!(after.total_units(), 2);
}

#[tokio::test]
async fn failed_persist_during_run_leaves_previous_file_and_aborts() {
    let dir = TempDir::new().unwrap();
    let path = checkpoint_path(dir.path());

    let seeded = CheckpointStore::new(&path, PersistPolicy::default());
    seeded.mark_unit_complete(0, "A", day(1)).unwrap();
    let before = fs::read(&path).unwrap();

    let store = CheckpointStore::new(&path, PersistPolicy::default()).with_rename(refuse_rename);
    let fetcher = ScriptedFetcher::new();
    let err = coordinator_with_store(
        store,
        registry(&["A"]),
        range(1, 2),
        fetcher.clone(),
        RecordingSink::new(),
        ShutdownSignal::shared(),
        1,
        3,
    )
    .run(&credential())
    .await
    .unwrap_err();

    assert!(matches!(err, CollectError::Checkpoint(ResumeError::Persist { .. })), "{err:?}");
    assert_eq!(fetcher.total_calls(), 1);
    assert_eq!(fs::read(&path).unwrap(), before);
    let on_disk = read_checkpoint(&path).unwrap().unwrap();
    assert!(!on_disk.is_unit_complete("A", day(2)));
    assert_eq!(stray_temp_files(path.parent().unwrap()), 0);
}

#[tokio::test]
async fn checkpoint_lock_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let path = checkpoint_path(dir.path());

    let first = ResumeLock::try_acquire(&path).unwrap();
    assert!(matches!(ResumeLock::try_acquire(&path), Err(ResumeError::LockError(_))));
    drop(first);
    assert!(ResumeLock::try_acquire(&path).is_ok());
}
