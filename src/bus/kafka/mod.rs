//! Kafka broker implementation.
//!
//! Envelopes travel as the JSON wire format in the message value. The
//! message key is the envelope type name, which keeps every type's messages
//! on one partition of a shared topic and therefore in order.
//!
//! Consumers use manual commits: ack commits `offset + 1`, nack seeks the
//! partition back so the same message is delivered again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use super::{
    Acknowledger, BusError, Delivery, KafkaConfig, Publisher, Result, Subscriber, Subscription,
};
use crate::envelope::Envelope;

/// Timeout for producer delivery and consumer seeks.
const KAFKA_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for Kafka connection.
#[derive(Clone, Debug)]
pub struct KafkaBrokerConfig {
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

impl KafkaBrokerConfig {
    /// Build a ClientConfig for producers.
    fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");
        config.set("enable.idempotence", "true");
        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for consumers in `group_id`.
    fn build_consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", group_id);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");
        self.apply_security_config(&mut config);
        config
    }

    /// Apply security settings to a ClientConfig.
    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }
        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }
        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }
        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }
        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

impl From<&KafkaConfig> for KafkaBrokerConfig {
    fn from(config: &KafkaConfig) -> Self {
        Self {
            bootstrap_servers: config.bootstrap_servers.clone(),
            sasl_username: config.sasl_username.clone(),
            sasl_password: config.sasl_password.clone(),
            sasl_mechanism: config.sasl_mechanism.clone(),
            security_protocol: config.security_protocol.clone(),
            ssl_ca_location: config.ssl_ca_location.clone(),
        }
    }
}

/// Kafka producer publishing envelopes.
pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn new(config: KafkaBrokerConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        info!(bootstrap_servers = %config.bootstrap_servers, "Kafka producer created");
        Ok(Self { producer })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    #[tracing::instrument(name = "kafka.publish", skip_all, fields(topic = %topic, type_name = %envelope.type_name))]
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()> {
        let payload = envelope
            .to_bytes()
            .map_err(|e| BusError::Publish(format!("Failed to encode envelope: {}", e)))?;

        let record = FutureRecord::to(topic)
            .payload(&payload)
            .key(envelope.type_name.as_str());

        let (partition, offset) = self
            .producer
            .send(record, KAFKA_TIMEOUT)
            .await
            .map_err(|(e, _)| BusError::Publish(format!("Failed to publish: {}", e)))?;

        debug!(partition, offset, "Published envelope to Kafka");
        Ok(())
    }
}

/// Opens one Kafka consumer per subscription.
pub struct KafkaSubscriber {
    config: KafkaBrokerConfig,
}

impl KafkaSubscriber {
    pub fn new(config: KafkaBrokerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Subscriber for KafkaSubscriber {
    async fn subscribe(&self, topic: &str, consumer_group: &str) -> Result<Box<dyn Subscription>> {
        let consumer: StreamConsumer = self
            .config
            .build_consumer_config(consumer_group)
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BusError::Subscribe(format!("Failed to subscribe to {}: {}", topic, e)))?;

        info!(topic = %topic, consumer_group = %consumer_group, "Subscribed to Kafka topic");

        Ok(Box::new(KafkaSubscription {
            consumer: Arc::new(consumer),
        }))
    }
}

struct KafkaSubscription {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BusError::Subscribe(format!("Kafka consumer error: {}", e)))?;

        let topic = message.topic().to_string();
        let partition = message.partition();
        let offset = message.offset();

        let acker = Box::new(KafkaAcker {
            consumer: self.consumer.clone(),
            topic: topic.clone(),
            partition,
            offset,
            settled: false,
        });

        let parsed = match message.payload() {
            Some(payload) => Envelope::from_bytes(payload).map_err(|e| e.to_string()),
            None => Err("empty payload".to_string()),
        };

        let envelope = match parsed {
            Ok(envelope) => envelope,
            Err(reason) => {
                // Not an envelope at all; commit past it so the partition keeps moving.
                acker.ack()?;
                return Err(BusError::Malformed {
                    topic,
                    message: format!("offset {}: {}", offset, reason),
                });
            }
        };

        debug!(topic = %topic, partition, offset, "Received envelope");
        Ok(Some(Delivery::new(envelope, acker)))
    }
}

struct KafkaAcker {
    consumer: Arc<StreamConsumer>,
    topic: String,
    partition: i32,
    offset: i64,
    settled: bool,
}

impl KafkaAcker {
    fn rewind(&mut self) -> Result<()> {
        self.settled = true;
        self.consumer
            .seek(
                &self.topic,
                self.partition,
                Offset::Offset(self.offset),
                KAFKA_TIMEOUT,
            )
            .map_err(|e| BusError::Acknowledge(format!("Failed to seek back: {}", e)))
    }
}

impl Acknowledger for KafkaAcker {
    fn ack(mut self: Box<Self>) -> Result<()> {
        self.settled = true;
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(|e| BusError::Acknowledge(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BusError::Acknowledge(format!("Failed to commit offset: {}", e)))
    }

    fn nack(mut self: Box<Self>) -> Result<()> {
        self.rewind()
    }
}

impl Drop for KafkaAcker {
    fn drop(&mut self) {
        if !self.settled {
            if let Err(e) = self.rewind() {
                warn!(
                    error = %e,
                    topic = %self.topic,
                    offset = self.offset,
                    "Failed to rewind unsettled message"
                );
            }
        }
    }
}
