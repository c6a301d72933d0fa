//! Cooperative cancellation for collection runs.
//!
//! A [`ShutdownSignal`] is created once per process, handed to the coordinator
//! and the fetch executor at construction, and triggered at most once by the
//! OS signal adapter in [`spawn_signal_listener`]. Nothing is preempted: the
//! coordinator stops submitting new units and the executor skips pending
//! backoff sleeps, while requests already on the wire finish or time out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Shared handle to a shutdown signal.
pub type SharedShutdown = Arc<ShutdownSignal>;

/// Process-wide, set-once cancellation flag.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    /// Create an untriggered signal.
    pub fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create an untriggered signal wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Trigger the signal. Returns `true` only for the call that flipped it.
    pub fn trigger(&self) -> bool {
        let first = !self.triggered.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Whether the signal has been triggered.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is triggered; immediately if it already was.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a trigger in between is not lost.
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

/// Bind SIGINT (and SIGTERM on unix) to `signal`.
///
/// The listener triggers the signal on the first interrupt; a second
/// interrupt is only logged, the run still drains in-flight units.
pub fn spawn_signal_listener(signal: SharedShutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if wait_for_os_signal().await.is_err() {
                warn!("Failed to listen for shutdown signals");
                return;
            }
            if signal.trigger() {
                warn!("Shutdown requested - finishing in-flight units and saving progress...");
            } else {
                warn!("Shutdown already in progress - waiting for in-flight units");
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_os_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
