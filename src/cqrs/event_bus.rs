//! Typed event publishing.

use std::sync::Arc;

use tracing::debug;

use crate::bus::{BusError, Publisher, TopicNaming};
use crate::codec::{CodecError, DomainEvent, EnvelopeCodec};
use crate::envelope::Metadata;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Publish(#[from] BusError),
}

/// Encodes typed events and hands them to a publisher.
///
/// No retries here. Delivery guarantees are those of the publisher: a
/// [`TxPublisher`](crate::outbox::TxPublisher) makes the publish part of a
/// database transaction, a broker publisher sends directly.
pub struct EventBus<P> {
    publisher: P,
    codec: Arc<EnvelopeCodec>,
    naming: TopicNaming,
}

impl<P: Publisher> EventBus<P> {
    pub fn new(publisher: P, codec: Arc<EnvelopeCodec>, naming: TopicNaming) -> Self {
        Self {
            publisher,
            codec,
            naming,
        }
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    /// Topic `E` is published on.
    pub fn topic_of<E: 'static>(&self) -> String {
        self.naming.topic_for(&self.codec.name_of::<E>())
    }

    pub async fn publish<E: DomainEvent>(&self, event: &E) -> Result<(), EventBusError> {
        self.publish_with_metadata(event, Metadata::new()).await
    }

    #[tracing::instrument(name = "event_bus.publish", skip_all, fields(type_name = %self.codec.name_of::<E>()))]
    pub async fn publish_with_metadata<E: DomainEvent>(
        &self,
        event: &E,
        metadata: Metadata,
    ) -> Result<(), EventBusError> {
        let envelope = self.codec.encode_with_metadata(event, metadata)?;
        let topic = self.naming.topic_for(&envelope.type_name);
        let message_id = envelope.id;

        self.publisher.publish(&topic, envelope).await?;

        debug!(%topic, %message_id, "Event published");
        Ok(())
    }

    /// Give the publisher back, e.g. to release a borrowed transaction.
    pub fn into_inner(self) -> P {
        self.publisher
    }
}
