//! Transactional outbox write path.
//!
//! Events are appended to the outbox table through the connection of an
//! already-open transaction, so they commit or roll back together with the
//! business change. The [`relay`] drains committed rows to the broker.
//!
//! ```yaml
//! outbox:
//!   topic: events_to_forward
//!   destination: events
//!   consumer_id: outbox-relay
//!   batch_size: 100
//!   poll_interval_ms: 500
//!   purge_delivered: false
//!   retry:
//!     min_delay_ms: 100
//!     max_delay_ms: 5000
//!     max_attempts: 5
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bus::{self, BusError, Publisher};
use crate::codec::{CodecError, DomainEvent, EnvelopeCodec};
use crate::envelope::Envelope;
use crate::storage::{NewOutboxRecord, OutboxAppend, OutboxPosition, StorageError};
use crate::utils::retry::RetryConfig;

pub mod relay;

pub use relay::{OutboxRelay, RelayConfig, RelayError};

/// Outbox topic rows are stored under by default.
pub const DEFAULT_OUTBOX_TOPIC: &str = "events_to_forward";
/// Broker topic rows are forwarded to by default.
pub const DEFAULT_DESTINATION: &str = "events";

/// Errors from the outbox write path.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Outbox and relay configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Outbox topic written by the business side and read by the relay.
    pub topic: String,
    /// Broker topic the event bus targets (shared topic naming).
    pub destination: String,
    /// Consumer identity of the relay's cursor.
    pub consumer_id: String,
    /// Rows fetched per relay batch.
    pub batch_size: usize,
    /// Idle wait between empty batches.
    pub poll_interval_ms: u64,
    /// Delete rows once the cursor has passed them.
    pub purge_delivered: bool,
    /// Backoff for failed publishes.
    pub retry: RetryConfig,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_OUTBOX_TOPIC.to_string(),
            destination: DEFAULT_DESTINATION.to_string(),
            consumer_id: "outbox-relay".to_string(),
            batch_size: 100,
            poll_interval_ms: 500,
            purge_delivered: false,
            retry: RetryConfig::default(),
        }
    }
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Encode `event` and append it to the outbox through `conn`.
///
/// `conn` must belong to the caller's open transaction; this never begins or
/// commits one.
pub async fn append_event<C, E>(
    conn: &mut C,
    codec: &EnvelopeCodec,
    outbox_topic: &str,
    destination: &str,
    event: &E,
) -> Result<OutboxPosition, OutboxError>
where
    C: OutboxAppend + ?Sized,
    E: DomainEvent,
{
    let envelope = codec.encode(event)?;
    let position = conn
        .append(NewOutboxRecord {
            topic: outbox_topic,
            destination,
            envelope: &envelope,
        })
        .await?;
    Ok(position)
}

/// Publisher that writes to the outbox inside an open transaction.
///
/// The topic passed to `publish` becomes the row's destination; the relay
/// later forwards the row there. Point an `EventBus` at one of these to make
/// typed publishes transactional.
pub struct TxPublisher<'c, C: OutboxAppend + ?Sized> {
    conn: Mutex<&'c mut C>,
    outbox_topic: String,
}

impl<'c, C: OutboxAppend + ?Sized> TxPublisher<'c, C> {
    pub fn new(conn: &'c mut C, outbox_topic: impl Into<String>) -> Self {
        Self {
            conn: Mutex::new(conn),
            outbox_topic: outbox_topic.into(),
        }
    }

    pub fn outbox_topic(&self) -> &str {
        &self.outbox_topic
    }
}

#[async_trait]
impl<'c, C: OutboxAppend + ?Sized> Publisher for TxPublisher<'c, C> {
    async fn publish(&self, topic: &str, envelope: Envelope) -> bus::Result<()> {
        let mut conn = self.conn.lock().await;
        let position = conn
            .append(NewOutboxRecord {
                topic: &self.outbox_topic,
                destination: topic,
                envelope: &envelope,
            })
            .await
            .map_err(|e| BusError::Outbox(e.to_string()))?;

        debug!(
            outbox_topic = %self.outbox_topic,
            destination = %topic,
            position = %position,
            "Envelope staged in outbox"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests;
