//! Outbox relay: drains committed outbox rows to the broker.
//!
//! The relay treats the outbox as an ordered queue. Each row is published to
//! its destination topic and the relay's cursor is persisted before the next
//! row is touched. A row that keeps failing blocks every row behind it; the
//! cursor never moves past an unconfirmed publish.
//!
//! Exactly one relay instance may run per (consumer, outbox topic). Nothing
//! here detects a second instance.

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use tracing::{debug, error, info, warn};

use super::OutboxConfig;
use crate::bus::{BusError, Publisher};
use crate::storage::{CursorStore, OutboxPosition, OutboxRecord, OutboxStore, StorageError, Stores};
use crate::utils::retry::RetryConfig;
use crate::utils::shutdown::Shutdown;

/// Relay failure.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Outbox storage error: {0}")]
    Storage(#[from] StorageError),

    /// Publishing the record at `position` failed after retries.
    #[error("Failed to publish outbox record {position}: {source}")]
    Publish {
        position: OutboxPosition,
        #[source]
        source: BusError,
    },
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Cursor owner.
    pub consumer_id: String,
    /// Outbox topic to drain.
    pub topic: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub purge_delivered: bool,
    pub retry: RetryConfig,
}

impl From<&OutboxConfig> for RelayConfig {
    fn from(config: &OutboxConfig) -> Self {
        Self {
            consumer_id: config.consumer_id.clone(),
            topic: config.topic.clone(),
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval(),
            purge_delivered: config.purge_delivered,
            retry: config.retry.clone(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&OutboxConfig::default())
    }
}

/// Moves outbox rows to the broker in position order.
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    cursors: Arc<dyn CursorStore>,
    publisher: Arc<dyn Publisher>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        cursors: Arc<dyn CursorStore>,
        publisher: Arc<dyn Publisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            outbox,
            cursors,
            publisher,
            config,
        }
    }

    /// Build a relay over both halves of `stores`.
    pub fn from_stores(
        stores: &Stores,
        publisher: Arc<dyn Publisher>,
        config: RelayConfig,
    ) -> Self {
        Self::new(
            stores.outbox.clone(),
            stores.cursors.clone(),
            publisher,
            config,
        )
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Current persisted cursor, if any.
    pub async fn cursor(&self) -> Result<Option<OutboxPosition>> {
        Ok(self
            .cursors
            .get(&self.config.consumer_id, &self.config.topic)
            .await?)
    }

    /// Load the cursor, creating it at position zero when absent.
    pub async fn ensure_cursor(&self) -> Result<OutboxPosition> {
        if let Some(position) = self.cursor().await? {
            return Ok(position);
        }
        self.cursors
            .put(
                &self.config.consumer_id,
                &self.config.topic,
                OutboxPosition::ZERO,
            )
            .await?;
        info!(
            consumer = %self.config.consumer_id,
            topic = %self.config.topic,
            "Created relay cursor"
        );
        Ok(OutboxPosition::ZERO)
    }

    /// Move the cursor to `position`.
    ///
    /// Rows after `position` are delivered again. Rows at or before it are
    /// skipped for good, which is how a poison row is passed over by hand.
    pub async fn reset_cursor(&self, position: OutboxPosition) -> Result<()> {
        self.cursors
            .put(&self.config.consumer_id, &self.config.topic, position)
            .await?;
        warn!(
            consumer = %self.config.consumer_id,
            topic = %self.config.topic,
            position = %position,
            "Relay cursor reset"
        );
        Ok(())
    }

    /// Relay one batch. Returns the number of rows delivered.
    ///
    /// Stops early on shutdown. A publish that still fails after retries
    /// ends the batch with [`RelayError::Publish`]; the cursor stays on the
    /// last delivered row.
    #[tracing::instrument(name = "outbox.relay_batch", skip_all, fields(consumer = %self.config.consumer_id, topic = %self.config.topic))]
    pub async fn relay_batch(&self, shutdown: &Shutdown) -> Result<usize> {
        let cursor = self.ensure_cursor().await?;
        let records = self
            .outbox
            .fetch_after(&self.config.topic, cursor, self.config.batch_size)
            .await?;

        let mut delivered = 0;
        let mut last = None;
        let outcome = async {
            for record in &records {
                if shutdown.is_triggered() {
                    break;
                }
                self.publish_with_retry(record, shutdown)
                    .await
                    .map_err(|source| RelayError::Publish {
                        position: record.position,
                        source,
                    })?;
                self.cursors
                    .put(&self.config.consumer_id, &self.config.topic, record.position)
                    .await?;

                debug!(
                    position = %record.position,
                    destination = %record.destination,
                    type_name = %record.envelope.type_name,
                    "Relayed outbox record"
                );
                delivered += 1;
                last = Some(record.position);
            }
            Ok::<_, RelayError>(())
        }
        .await;

        if let (true, Some(through)) = (self.config.purge_delivered, last) {
            match self.outbox.purge_through(&self.config.topic, through).await {
                Ok(removed) => debug!(removed, through = %through, "Purged delivered outbox rows"),
                Err(e) => warn!(error = %e, "Failed to purge delivered outbox rows"),
            }
        }

        outcome.map(|()| delivered)
    }

    /// Publish one record, retrying transient failures with backoff.
    async fn publish_with_retry(
        &self,
        record: &OutboxRecord,
        shutdown: &Shutdown,
    ) -> std::result::Result<(), BusError> {
        let mut delays = self.config.retry.backoff().build();
        let mut attempt = 1;

        loop {
            match self
                .publisher
                .publish(&record.destination, record.envelope.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    let Some(delay) = delays.next() else {
                        return Err(e);
                    };
                    warn!(
                        position = %record.position,
                        attempt,
                        backoff_ms = %delay.as_millis(),
                        error = %e,
                        "Publish failed, retrying after backoff"
                    );
                    if !shutdown.sleep(delay).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Relay until shutdown.
    ///
    /// Full batches are followed immediately by the next one; otherwise the
    /// relay waits `poll_interval`. Batch failures are logged and retried on
    /// the next poll. Only a cursor that cannot be created is returned.
    pub async fn run(&self, shutdown: Shutdown) -> Result<()> {
        let cursor = self.ensure_cursor().await?;
        info!(
            consumer = %self.config.consumer_id,
            topic = %self.config.topic,
            cursor = %cursor,
            "Outbox relay started"
        );

        while !shutdown.is_triggered() {
            let full = match self.relay_batch(&shutdown).await {
                Ok(delivered) => delivered >= self.config.batch_size,
                Err(e) => {
                    if !shutdown.is_triggered() {
                        error!(error = %e, "Outbox relay batch failed");
                    }
                    false
                }
            };

            if !full && !shutdown.sleep(self.config.poll_interval).await {
                break;
            }
        }

        info!(consumer = %self.config.consumer_id, "Outbox relay stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
