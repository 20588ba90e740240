//! Message router.
//!
//! Pumps deliveries from subscriptions through a middleware chain into
//! handlers and settles each delivery from the outcome:
//!
//! - consumer handlers: ack on `Ok`, nack on `Err`
//! - transform handlers: every returned envelope is published to the
//!   registration's output first; the input is acked only if all of those
//!   publishes succeed
//!
//! A failed delivery is nacked after `redelivery_delay` and comes back from
//! the broker. There is no dead-letter state.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, Delivery, Publisher, Subscriber, Subscription, TopicNaming};
use crate::codec::CodecError;
use crate::envelope::Envelope;
use crate::utils::shutdown::Shutdown;

pub mod middleware;
pub mod splitter;

pub use middleware::{Instrument, Middleware, Recoverer};

/// Handler failure. Always turns into a nack.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Failed to publish handler output: {0}")]
    Publish(#[source] BusError),
}

impl HandlerError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        HandlerError::Failed(message.to_string())
    }

    /// Whether redelivery may succeed without outside intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Failed(_) => true,
            HandlerError::Publish(e) => e.is_transient(),
            HandlerError::Panicked(_) | HandlerError::Codec(_) => false,
        }
    }
}

/// Router setup and run errors.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Handler '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("Router has no handlers")]
    NoHandlers,

    #[error("Handler '{handler}' could not subscribe to '{topic}': {source}")]
    Subscribe {
        handler: String,
        topic: String,
        #[source]
        source: BusError,
    },
}

/// Future returned by a handler: derived envelopes or a failure.
pub type HandlerFuture = BoxFuture<'static, Result<Vec<Envelope>, HandlerError>>;

/// Type-erased handler as seen by middleware.
pub type HandlerFunc = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

/// Router configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Shared topic the splitter consumes.
    pub events_topic: String,
    /// Splitter handler name, also its consumer group.
    pub splitter_name: String,
    /// Wait before nacking a failed delivery.
    pub redelivery_delay_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            events_topic: "events".to_string(),
            splitter_name: "splitter".to_string(),
            redelivery_delay_ms: 1_000,
        }
    }
}

impl RouterConfig {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

struct Output {
    naming: TopicNaming,
    publisher: Arc<dyn Publisher>,
}

/// One handler bound to one topic.
pub struct HandlerRegistration {
    name: String,
    topic: String,
    consumer_group: String,
    concurrency: usize,
    handler: HandlerFunc,
    output: Option<Output>,
}

impl HandlerRegistration {
    /// A handler that only consumes.
    pub fn consumer<F, Fut>(name: impl Into<String>, topic: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let func: HandlerFunc = Arc::new(move |envelope: Envelope| -> HandlerFuture {
            let fut = handler(envelope);
            Box::pin(async move { fut.await.map(|()| Vec::new()) })
        });
        Self::with_handler(name.into(), topic.into(), func, None)
    }

    /// A handler whose returned envelopes are published via `publisher`,
    /// each to the topic `output` names for its type.
    pub fn transform<F, Fut>(
        name: impl Into<String>,
        topic: impl Into<String>,
        output: TopicNaming,
        publisher: Arc<dyn Publisher>,
        handler: F,
    ) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Envelope>, HandlerError>> + Send + 'static,
    {
        let func: HandlerFunc =
            Arc::new(move |envelope: Envelope| -> HandlerFuture { Box::pin(handler(envelope)) });
        Self::with_handler(
            name.into(),
            topic.into(),
            func,
            Some(Output {
                naming: output,
                publisher,
            }),
        )
    }

    fn with_handler(
        name: String,
        topic: String,
        handler: HandlerFunc,
        output: Option<Output>,
    ) -> Self {
        Self {
            consumer_group: name.clone(),
            name,
            topic,
            concurrency: 1,
            handler,
            output,
        }
    }

    /// Override the consumer group (defaults to the handler name).
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    /// Number of competing subscriptions in the consumer group.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }
}

/// Resolves once the router has opened every subscription.
pub struct Running {
    rx: watch::Receiver<bool>,
}

impl Running {
    /// Returns `false` if the router stopped before it started running.
    pub async fn wait(mut self) -> bool {
        self.rx.wait_for(|running| *running).await.is_ok()
    }
}

/// Routes deliveries from subscriptions to handlers.
pub struct Router {
    subscriber: Arc<dyn Subscriber>,
    config: RouterConfig,
    middlewares: Vec<Arc<dyn Middleware>>,
    registrations: Vec<HandlerRegistration>,
    names: HashSet<String>,
    running: watch::Sender<bool>,
}

impl Router {
    pub fn new(subscriber: Arc<dyn Subscriber>, config: RouterConfig) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            subscriber,
            config,
            middlewares: Vec::new(),
            registrations: Vec::new(),
            names: HashSet::new(),
            running,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Add a middleware. The first one added is the outermost.
    pub fn add_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn add_handler(&mut self, registration: HandlerRegistration) -> Result<(), RouterError> {
        if !self.names.insert(registration.name.clone()) {
            return Err(RouterError::DuplicateHandler(registration.name));
        }
        debug!(
            handler = %registration.name,
            topic = %registration.topic,
            consumer_group = %registration.consumer_group,
            "Handler registered"
        );
        self.registrations.push(registration);
        Ok(())
    }

    /// Register the splitter: `events_topic` fanned out to one topic per type.
    pub fn add_splitter(&mut self, publisher: Arc<dyn Publisher>) -> Result<(), RouterError> {
        let registration = splitter::registration(
            self.config.splitter_name.clone(),
            self.config.events_topic.clone(),
            publisher,
        );
        self.add_handler(registration)
    }

    pub fn running(&self) -> Running {
        Running {
            rx: self.running.subscribe(),
        }
    }

    /// Open every subscription, then consume until shutdown.
    ///
    /// Subscription failures abort before any message is processed.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), RouterError> {
        if self.registrations.is_empty() {
            return Err(RouterError::NoHandlers);
        }

        let redelivery_delay = self.config.redelivery_delay();
        let mut loops = Vec::new();

        for registration in self.registrations {
            let mut handler = registration.handler.clone();
            for middleware in self.middlewares.iter().rev() {
                handler = middleware.wrap(&registration.name, handler);
            }

            let route = Arc::new(Route {
                name: registration.name.clone(),
                topic: registration.topic.clone(),
                handler,
                output: registration.output,
                redelivery_delay,
            });

            for _ in 0..registration.concurrency {
                let subscription = self
                    .subscriber
                    .subscribe(&registration.topic, &registration.consumer_group)
                    .await
                    .map_err(|source| RouterError::Subscribe {
                        handler: registration.name.clone(),
                        topic: registration.topic.clone(),
                        source,
                    })?;
                loops.push((route.clone(), subscription));
            }
        }

        let mut tasks = JoinSet::new();
        for (route, subscription) in loops {
            tasks.spawn(consume(route, subscription, shutdown.clone()));
        }

        self.running.send_replace(true);
        info!(subscriptions = tasks.len(), "Router running");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Router consume loop aborted");
            }
        }

        info!("Router stopped");
        Ok(())
    }
}

struct Route {
    name: String,
    topic: String,
    handler: HandlerFunc,
    output: Option<Output>,
    redelivery_delay: Duration,
}

async fn consume(route: Arc<Route>, mut subscription: Box<dyn Subscription>, shutdown: Shutdown) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            next = subscription.next() => next,
        };

        match next {
            Ok(Some(delivery)) => handle(&route, delivery, &shutdown).await,
            Ok(None) => {
                info!(handler = %route.name, topic = %route.topic, "Subscription closed");
                break;
            }
            Err(e) => {
                error!(handler = %route.name, topic = %route.topic, error = %e, "Receive failed");
                if !shutdown.sleep(route.redelivery_delay).await {
                    break;
                }
            }
        }
    }
}

async fn handle(route: &Route, delivery: Delivery, shutdown: &Shutdown) {
    let (envelope, acker) = delivery.into_parts();
    let message_id = envelope.id;
    let type_name = envelope.type_name.clone();

    let outcome = match (route.handler)(envelope).await {
        Ok(outputs) => publish_outputs(route, outputs).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = acker.ack() {
                error!(handler = %route.name, %message_id, error = %e, "Ack failed");
            }
        }
        Err(e) => {
            if e.is_retryable() {
                warn!(
                    handler = %route.name,
                    %message_id,
                    %type_name,
                    error = %e,
                    "Handler failed, message will be redelivered"
                );
            } else {
                error!(
                    handler = %route.name,
                    %message_id,
                    %type_name,
                    error = %e,
                    "Handler failed, message will be redelivered"
                );
            }
            // Interrupted by shutdown: nack right away.
            shutdown.sleep(route.redelivery_delay).await;
            if let Err(e) = acker.nack() {
                error!(handler = %route.name, %message_id, error = %e, "Nack failed");
            }
        }
    }
}

async fn publish_outputs(route: &Route, outputs: Vec<Envelope>) -> Result<(), HandlerError> {
    if outputs.is_empty() {
        return Ok(());
    }
    let Some(output) = &route.output else {
        warn!(handler = %route.name, dropped = outputs.len(), "Consumer handler returned messages");
        return Ok(());
    };

    for envelope in outputs {
        let topic = output.naming.topic_for(&envelope.type_name);
        output
            .publisher
            .publish(&topic, envelope)
            .await
            .map_err(HandlerError::Publish)?;
    }
    Ok(())
}
