//! Process-wide cancellation signal.
//!
//! One [`ShutdownTrigger`] is held by the supervisor; every long-running task
//! gets a cloned [`Shutdown`] and selects on it around its I/O waits.

use std::time::Duration;

use tokio::sync::watch;

/// Create a connected trigger/signal pair.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Fires the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal every [`Shutdown`] handle. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Another handle observing this trigger.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes the shutdown signal. Dropping the trigger counts as shutdown.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown is signalled.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // Err means the trigger is gone, which is shutdown too.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Sleep for `duration` unless shutdown comes first.
    ///
    /// Returns `false` when interrupted by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }
}
