//! Outbox table interfaces.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::envelope::{Envelope, Metadata};
use crate::storage::{Result, StorageError};

/// Position of a record in the outbox read order.
///
/// Records are read in `(transaction_id, sequence)` order. Backends that
/// serialize writers (SQLite) always use transaction id 0, so the position
/// reduces to the sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutboxPosition {
    pub transaction_id: i64,
    pub sequence: i64,
}

impl OutboxPosition {
    /// Position before any record.
    pub const ZERO: OutboxPosition = OutboxPosition {
        transaction_id: 0,
        sequence: 0,
    };

    pub fn new(transaction_id: i64, sequence: i64) -> Self {
        Self {
            transaction_id,
            sequence,
        }
    }

    /// Position for backends without transaction ids.
    pub fn at_sequence(sequence: i64) -> Self {
        Self::new(0, sequence)
    }
}

impl std::fmt::Display for OutboxPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.sequence)
    }
}

/// One persisted outbox row.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub position: OutboxPosition,
    /// Outbox topic the row belongs to (the relay's read scope).
    pub topic: String,
    /// Broker topic the relay publishes the envelope to.
    pub destination: String,
    pub envelope: Envelope,
    pub created_at: DateTime<Utc>,
}

/// Row to insert into the outbox.
#[derive(Debug, Clone, Copy)]
pub struct NewOutboxRecord<'a> {
    pub topic: &'a str,
    pub destination: &'a str,
    pub envelope: &'a Envelope,
}

/// Read side of the outbox, used by the relay.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Records of `topic` strictly after `after`, ascending, at most `limit`.
    ///
    /// Only records whose writing transaction has committed, and after which
    /// no earlier position can still appear, are returned.
    async fn fetch_after(
        &self,
        topic: &str,
        after: OutboxPosition,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>>;

    /// Delete records of `topic` at or before `through`. Returns rows removed.
    async fn purge_through(&self, topic: &str, through: OutboxPosition) -> Result<u64>;

    /// Number of records currently stored for `topic`.
    async fn count(&self, topic: &str) -> Result<u64>;
}

/// Write side of the outbox, implemented by transaction-scoped connections.
///
/// Never opens a transaction of its own: the row commits or rolls back with
/// whatever transaction the connection is in.
#[async_trait]
pub trait OutboxAppend: Send {
    async fn append(&mut self, record: NewOutboxRecord<'_>) -> Result<OutboxPosition>;
}

/// Column values of an outbox row as stored.
#[derive(Debug)]
pub(crate) struct OutboxRow {
    pub transaction_id: i64,
    pub sequence: i64,
    pub topic: String,
    pub destination: String,
    pub envelope_id: String,
    pub type_name: String,
    pub payload: Vec<u8>,
    pub metadata: String,
    pub created_at: String,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = StorageError;

    fn try_from(row: OutboxRow) -> Result<Self> {
        let metadata: Metadata = serde_json::from_str(&row.metadata)?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|source| StorageError::InvalidTimestamp {
                value: row.created_at.clone(),
                source,
            })?
            .with_timezone(&Utc);

        Ok(OutboxRecord {
            position: OutboxPosition::new(row.transaction_id, row.sequence),
            topic: row.topic,
            destination: row.destination,
            envelope: Envelope {
                id: Uuid::parse_str(&row.envelope_id)?,
                type_name: row.type_name,
                payload: row.payload,
                metadata,
            },
            created_at,
        })
    }
}

/// Serialize envelope metadata for the `metadata` column.
#[cfg_attr(not(any(feature = "sqlite", feature = "postgres")), allow(dead_code))]
pub(crate) fn metadata_json(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(&envelope.metadata)?)
}
