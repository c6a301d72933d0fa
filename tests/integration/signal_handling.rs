use std::time::Duration;

use super::support::{credential, day, fast_policy, offset, ScriptedFetcher};
use device_data_collector::downloader::FetchExecutor;
use device_data_collector::fetcher::FetcherError;
use device_data_collector::shutdown::ShutdownSignal;
use device_data_collector::{DayWindow, WorkUnit};
use futures::StreamExt;

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownSignal::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.cancelled().await;
            true
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(shutdown.trigger());

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// Triggering before anyone waits must not be lost.
#[tokio::test]
async fn trigger_before_wait_is_observed() {
    let shutdown = ShutdownSignal::shared();
    shutdown.trigger();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move {
        handle.cancelled().await;
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "cancelled() hung although shutdown was already triggered");
}

#[tokio::test]
async fn concurrent_waiters_all_notified() {
    let shutdown = ShutdownSignal::shared();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let handle = shutdown.clone();
        waiters.push(tokio::spawn(async move {
            handle.cancelled().await;
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.trigger();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "A waiter was not notified of shutdown");
    }
}

#[tokio::test]
async fn repeated_trigger_is_idempotent() {
    let shutdown = ShutdownSignal::shared();
    assert!(shutdown.trigger());
    assert!(!shutdown.trigger());
    assert!(!shutdown.trigger());
    assert!(shutdown.is_triggered());
}

#[tokio::test]
async fn backoff_is_cut_short_and_later_units_are_not_started() {
    let fetcher = ScriptedFetcher::new();
    fetcher.always_fail("A", day(1), FetcherError::Server(500));
    let shutdown = ShutdownSignal::shared();

    let mut policy = fast_policy(10);
    policy.initial_backoff = Duration::from_secs(3600);
    policy.max_backoff = Duration::from_secs(3600);
    let executor = FetchExecutor::new(fetcher.clone(), policy, 1, shutdown.clone());

    let units: Vec<WorkUnit> = (1..=3)
        .map(|d| WorkUnit::new("A", DayWindow::new(day(d), offset())))
        .collect();

    let trigger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.trigger();
        })
    };

    let credential = credential();
    let results: Vec<_> = tokio::time::timeout(
        Duration::from_secs(5),
        executor.fetch_all(&credential, units).collect::<Vec<_>>(),
    )
    .await
    .expect("shutdown should interrupt the backoff sleep");
    trigger.await.unwrap();

    assert_eq!(results.len(), 1);
    let (unit, result) = &results[0];
    assert_eq!(unit.date(), day(1));
    assert_eq!(result.as_ref().unwrap_err().error, FetcherError::Interrupted);
    assert_eq!(fetcher.calls("A", day(1)), 1);
    assert_eq!(fetcher.calls("A", day(2)), 0);
}
