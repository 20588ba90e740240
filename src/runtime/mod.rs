//! Service supervisor: runs the router and the relay under one shutdown signal.
//!
//! The relay only starts once every router subscription is open. If either
//! component stops on its own, the other is shut down and the error is
//! returned, so the process never keeps running half of the pipeline.

use std::future::Future;

use tokio::task::JoinError;
use tracing::{error, info};

use crate::outbox::{OutboxRelay, RelayError};
use crate::router::{Router, RouterError};
use crate::utils::shutdown;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Task failed: {0}")]
    Task(#[from] JoinError),

    #[error("{0} stopped unexpectedly")]
    Stopped(&'static str),
}

enum Exit {
    Requested,
    Router(Result<Result<(), RouterError>, JoinError>),
    Relay(Result<Result<(), RelayError>, JoinError>),
}

/// Error of a component that exited before shutdown was requested.
fn early_exit<E>(
    component: &'static str,
    joined: Result<Result<(), E>, JoinError>,
) -> RuntimeError
where
    RuntimeError: From<E>,
{
    match joined {
        Ok(Ok(())) => RuntimeError::Stopped(component),
        Ok(Err(e)) => e.into(),
        Err(e) => e.into(),
    }
}

/// Run `router` and `relay` until `stop` resolves or either component exits.
pub async fn run<F>(router: Router, relay: OutboxRelay, stop: F) -> Result<(), RuntimeError>
where
    F: Future<Output = ()>,
{
    let (trigger, shutdown) = shutdown::channel();
    let running = router.running();
    let mut router_task = tokio::spawn(router.run(shutdown.clone()));

    if !running.wait().await {
        trigger.trigger();
        return Err(early_exit("router", router_task.await));
    }

    let mut relay_task = tokio::spawn(async move { relay.run(shutdown).await });
    info!("Router and relay running");

    let exit = tokio::select! {
        _ = stop => Exit::Requested,
        joined = &mut router_task => Exit::Router(joined),
        joined = &mut relay_task => Exit::Relay(joined),
    };
    trigger.trigger();

    match exit {
        Exit::Requested => {
            info!("Shutdown requested");
            router_task.await??;
            relay_task.await??;
            Ok(())
        }
        Exit::Router(joined) => {
            let err = early_exit("router", joined);
            error!(error = %err, "Router exited, stopping relay");
            if let Ok(Err(e)) = relay_task.await {
                error!(error = %e, "Relay stopped with error");
            }
            Err(err)
        }
        Exit::Relay(joined) => {
            let err = early_exit("relay", joined);
            error!(error = %err, "Relay exited, stopping router");
            if let Ok(Err(e)) = router_task.await {
                error!(error = %e, "Router stopped with error");
            }
            Err(err)
        }
    }
}
