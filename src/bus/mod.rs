//! Broker abstraction for envelope delivery.
//!
//! This module contains:
//! - `Publisher` trait: Send an envelope to a named topic
//! - `Subscriber` / `Subscription` traits: Consume a topic within a consumer group
//! - `Delivery` / `Acknowledger`: Per-message ack/nack
//! - Topic naming and messaging configuration
//! - Implementations: in-memory channel broker, Kafka, Mock

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::envelope::Envelope;

// Implementation modules
pub mod channel;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

// Re-exports
pub use channel::ChannelBroker;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaBrokerConfig, KafkaPublisher, KafkaSubscriber};
pub use mock::MockPublisher;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Acknowledge failed: {0}")]
    Acknowledge(String),

    #[error("Outbox write failed: {0}")]
    Outbox(String),

    #[error("Malformed message on topic '{topic}': {message}")]
    Malformed { topic: String, message: String },
}

impl BusError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Connection(_) | BusError::Publish(_))
    }
}

/// Sends envelopes to broker topics.
///
/// Implementations:
/// - `ChannelBroker`: in-process topic log
/// - `KafkaPublisher`: Apache Kafka
/// - `TxPublisher`: outbox table inside an open transaction
/// - `MockPublisher`: records publishes for tests
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one envelope to `topic`.
    ///
    /// Returns once the broker has accepted the message.
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()>;
}

#[async_trait]
impl<T: Publisher + ?Sized> Publisher for Arc<T> {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()> {
        (**self).publish(topic, envelope).await
    }
}

/// Opens subscriptions on broker topics.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribe to `topic` as a member of `consumer_group`.
    ///
    /// Each consumer group tracks its own committed position. A group seen
    /// for the first time starts from the oldest retained message.
    async fn subscribe(&self, topic: &str, consumer_group: &str) -> Result<Box<dyn Subscription>>;
}

/// A live subscription yielding deliveries in topic order.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `Ok(None)` means the subscription closed.
    async fn next(&mut self) -> Result<Option<Delivery>>;
}

/// Settles a single delivery with the broker.
pub trait Acknowledger: Send {
    /// Confirm processing; the group's position moves past this message.
    fn ack(self: Box<Self>) -> Result<()>;

    /// Reject processing; the message will be delivered again.
    fn nack(self: Box<Self>) -> Result<()>;
}

/// A received envelope plus the handle used to settle it.
pub struct Delivery {
    envelope: Envelope,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(envelope: Envelope, acker: Box<dyn Acknowledger>) -> Self {
        Self { envelope, acker }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn into_parts(self) -> (Envelope, Box<dyn Acknowledger>) {
        (self.envelope, self.acker)
    }

    pub fn ack(self) -> Result<()> {
        self.acker.ack()
    }

    pub fn nack(self) -> Result<()> {
        self.acker.nack()
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Topic naming
// ============================================================================

/// Maps an event type name to the topic it is published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicNaming {
    /// Every type goes to the same topic.
    Shared(String),
    /// One topic per type name.
    PerType,
    /// One topic per type name, with a prefix (`{prefix}.{type_name}`).
    Prefixed(String),
}

impl TopicNaming {
    pub fn topic_for(&self, type_name: &str) -> String {
        match self {
            TopicNaming::Shared(topic) => topic.clone(),
            TopicNaming::PerType => type_name.to_string(),
            TopicNaming::Prefixed(prefix) => format!("{}.{}", prefix, type_name),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process channel broker.
    #[default]
    Channel,
    /// Apache Kafka.
    Kafka,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Kafka-specific configuration.
    pub kafka: KafkaConfig,
}

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Publisher and subscriber halves of a broker connection.
#[derive(Clone)]
pub struct Broker {
    pub publisher: Arc<dyn Publisher>,
    pub subscriber: Arc<dyn Subscriber>,
}

/// Initialize the broker based on configuration.
///
/// Kafka requires the `kafka` feature.
pub async fn init_broker(
    config: &MessagingConfig,
) -> std::result::Result<Broker, Box<dyn std::error::Error + Send + Sync>> {
    match config.messaging_type {
        MessagingType::Channel => {
            let broker = Arc::new(ChannelBroker::new());
            info!(messaging_type = "channel", "Broker initialized");
            Ok(Broker {
                publisher: broker.clone(),
                subscriber: broker,
            })
        }
        MessagingType::Kafka => {
            #[cfg(feature = "kafka")]
            {
                let kafka_config = KafkaBrokerConfig::from(&config.kafka);
                let publisher = KafkaPublisher::new(kafka_config.clone())?;
                let subscriber = KafkaSubscriber::new(kafka_config);
                info!(
                    messaging_type = "kafka",
                    bootstrap_servers = %config.kafka.bootstrap_servers,
                    "Broker initialized"
                );
                Ok(Broker {
                    publisher: Arc::new(publisher),
                    subscriber: Arc::new(subscriber),
                })
            }

            #[cfg(not(feature = "kafka"))]
            {
                Err(
                    "Kafka support requires the 'kafka' feature. Rebuild with --features kafka"
                        .into(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests;
