//! Handler middleware.
//!
//! A middleware wraps a [`HandlerFunc`] in another one. Router middleware is
//! applied in registration order, the first added running outermost.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, info_span, Instrument as _};

use super::{HandlerError, HandlerFunc, HandlerFuture};
use crate::envelope::Envelope;

pub trait Middleware: Send + Sync {
    /// Wrap `next`, the handler registered as `handler_name`.
    fn wrap(&self, handler_name: &str, next: HandlerFunc) -> HandlerFunc;
}

/// Turns a panicking handler into [`HandlerError::Panicked`].
///
/// Covers panics while building the handler future and while polling it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recoverer;

impl Middleware for Recoverer {
    fn wrap(&self, handler_name: &str, next: HandlerFunc) -> HandlerFunc {
        let handler_name: Arc<str> = handler_name.into();
        Arc::new(move |envelope: Envelope| -> HandlerFuture {
            let next = next.clone();
            let handler_name = handler_name.clone();
            Box::pin(async move {
                let message_id = envelope.id;
                let result = match std::panic::catch_unwind(AssertUnwindSafe(|| next(envelope))) {
                    Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                    Err(panic) => Err(panic),
                };
                result.unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    error!(
                        handler = %handler_name,
                        %message_id,
                        panic = %message,
                        "Handler panicked"
                    );
                    Err(HandlerError::Panicked(message))
                })
            })
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs each handler call in a span and logs its latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct Instrument;

impl Middleware for Instrument {
    fn wrap(&self, handler_name: &str, next: HandlerFunc) -> HandlerFunc {
        let handler_name: Arc<str> = handler_name.into();
        Arc::new(move |envelope: Envelope| -> HandlerFuture {
            let span = info_span!(
                "router.handle",
                handler = %handler_name,
                message_id = %envelope.id,
                type_name = %envelope.type_name,
            );
            let fut = next(envelope);
            Box::pin(
                async move {
                    let started = Instant::now();
                    let result = fut.await;
                    debug!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        success = result.is_ok(),
                        outputs = result.as_ref().map(Vec::len).unwrap_or(0),
                        "Handler finished"
                    );
                    result
                }
                .instrument(span),
            )
        })
    }
}
