//! Typed event handlers on top of the router.
//!
//! Every handler gets its own registration, named after the handler and
//! consuming in its own consumer group, so handlers advance, scale and
//! replay independently. The subscribed topic comes from the event's type
//! name.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::bus::TopicNaming;
use crate::codec::{CodecError, DomainEvent, EnvelopeCodec};
use crate::envelope::Envelope;
use crate::router::{HandlerError, HandlerRegistration, Router, RouterError};

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("Event type '{type_name}' is not registered with the codec")]
    Unregistered { type_name: String },

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Registers typed handlers on a [`Router`].
#[derive(Clone)]
pub struct EventProcessor {
    codec: Arc<EnvelopeCodec>,
    naming: TopicNaming,
}

impl EventProcessor {
    pub fn new(codec: Arc<EnvelopeCodec>, naming: TopicNaming) -> Self {
        Self { codec, naming }
    }

    /// Register `handler` for events of type `E` under `name`.
    ///
    /// Deliveries are decoded before the handler runs:
    /// - an unregistered type name fails with `UnknownEventType` and is nacked
    /// - a registered type other than `E` (the topic is shared) is acked and skipped
    pub fn add_handler<E, F, Fut>(
        &self,
        router: &mut Router,
        name: impl Into<String>,
        handler: F,
    ) -> Result<(), ProcessorError>
    where
        E: DomainEvent,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let type_name = self.codec.name_of::<E>();
        if !self.codec.is_registered(&type_name) {
            return Err(ProcessorError::Unregistered { type_name });
        }

        let name = name.into();
        let topic = self.naming.topic_for(&type_name);
        let codec = self.codec.clone();
        let handler = Arc::new(handler);
        let handler_name: Arc<str> = name.as_str().into();

        let registration = HandlerRegistration::consumer(name, topic, move |envelope: Envelope| {
            let codec = codec.clone();
            let handler = handler.clone();
            let handler_name = handler_name.clone();
            async move {
                let decoded = codec.decode(&envelope)?;
                if !decoded.is::<E>() {
                    debug!(
                        handler = %handler_name,
                        type_name = %decoded.type_name(),
                        "Skipping event handled elsewhere"
                    );
                    return Ok(());
                }
                let event = decoded.downcast::<E>().map_err(|other| CodecError::TypeMismatch {
                    expected: codec.name_of::<E>(),
                    actual: other.type_name().to_string(),
                })?;
                handler(event).await
            }
        });

        router.add_handler(registration)?;
        Ok(())
    }
}
