//! In-memory outbox.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::envelope::Envelope;
use crate::storage::{
    NewOutboxRecord, OutboxAppend, OutboxPosition, OutboxRecord, OutboxStore, Result, StorageError,
};

/// Mock outbox store that keeps records in memory.
///
/// Rows are written either with [`push`](Self::push) (an immediately
/// committed append) or through a [`MockOutboxConnection`], which buffers
/// rows until [`commit_into`](MockOutboxConnection::commit_into).
#[derive(Default)]
pub struct MockOutboxStore {
    records: RwLock<BTreeMap<OutboxPosition, OutboxRecord>>,
    next_sequence: RwLock<i64>,
    fail_on_fetch: RwLock<bool>,
    fail_on_purge: RwLock<bool>,
}

impl MockOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_fetch(&self, fail: bool) {
        *self.fail_on_fetch.write().await = fail;
    }

    pub async fn set_fail_on_purge(&self, fail: bool) {
        *self.fail_on_purge.write().await = fail;
    }

    /// Append a committed record.
    pub async fn push(&self, topic: &str, destination: &str, envelope: Envelope) -> OutboxPosition {
        let mut next = self.next_sequence.write().await;
        *next += 1;
        let position = OutboxPosition::at_sequence(*next);

        self.records.write().await.insert(
            position,
            OutboxRecord {
                position,
                topic: topic.to_string(),
                destination: destination.to_string(),
                envelope,
                created_at: Utc::now(),
            },
        );
        position
    }

    /// All stored records, in position order.
    pub async fn records(&self) -> Vec<OutboxRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl OutboxStore for MockOutboxStore {
    async fn fetch_after(
        &self,
        topic: &str,
        after: OutboxPosition,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>> {
        if *self.fail_on_fetch.read().await {
            return Err(StorageError::Mock("fetch failed".to_string()));
        }
        let records = self.records.read().await;
        Ok(records
            .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| record.topic == topic)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_through(&self, topic: &str, through: OutboxPosition) -> Result<u64> {
        if *self.fail_on_purge.read().await {
            return Err(StorageError::Mock("purge failed".to_string()));
        }
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|position, record| record.topic != topic || *position > through);
        Ok((before - records.len()) as u64)
    }

    async fn count(&self, topic: &str) -> Result<u64> {
        let records = self.records.read().await;
        Ok(records.values().filter(|r| r.topic == topic).count() as u64)
    }
}

/// Buffered writer standing in for a transaction's connection.
#[derive(Default)]
pub struct MockOutboxConnection {
    pending: Vec<(String, String, Envelope)>,
    fail_on_append: bool,
}

impl MockOutboxConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection whose appends always fail.
    pub fn failing() -> Self {
        Self {
            pending: Vec::new(),
            fail_on_append: true,
        }
    }

    /// Number of rows written but not yet committed.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Commit buffered rows to `store` in write order.
    pub async fn commit_into(self, store: &MockOutboxStore) -> Vec<OutboxPosition> {
        let mut positions = Vec::with_capacity(self.pending.len());
        for (topic, destination, envelope) in self.pending {
            positions.push(store.push(&topic, &destination, envelope).await);
        }
        positions
    }
}

#[async_trait]
impl OutboxAppend for MockOutboxConnection {
    async fn append(&mut self, record: NewOutboxRecord<'_>) -> Result<OutboxPosition> {
        if self.fail_on_append {
            return Err(StorageError::Mock("append failed".to_string()));
        }
        self.pending.push((
            record.topic.to_string(),
            record.destination.to_string(),
            record.envelope.clone(),
        ));
        // Real positions are assigned at commit.
        Ok(OutboxPosition::at_sequence(self.pending.len() as i64))
    }
}
