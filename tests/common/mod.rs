//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use tokio::task::JoinHandle;

use outbox_relay::router::{Router, RouterError};
use outbox_relay::utils::shutdown::{self, ShutdownTrigger};

/// Upper bound on how long any asynchronous expectation may take.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds, panicking after [`TIMEOUT`].
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Spawn `router` and wait until all of its subscriptions are open.
pub async fn start_router(
    router: Router,
) -> (ShutdownTrigger, JoinHandle<Result<(), RouterError>>) {
    let (trigger, shutdown) = shutdown::channel();
    let running = router.running();
    let task = tokio::spawn(router.run(shutdown));
    assert!(running.wait().await, "router failed to start");
    (trigger, task)
}

/// Trigger shutdown and require a clean exit.
pub async fn stop_router(trigger: ShutdownTrigger, task: JoinHandle<Result<(), RouterError>>) {
    trigger.trigger();
    tokio::time::timeout(TIMEOUT, task)
        .await
        .expect("router did not stop")
        .expect("router task panicked")
        .expect("router returned an error");
}

/// SQLite URL for a database file inside `dir`.
pub fn sqlite_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite:{}?mode=rwc", dir.path().join("outbox.db").display())
}
