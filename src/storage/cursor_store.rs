//! CursorStore trait.

use async_trait::async_trait;

use crate::storage::{OutboxPosition, Result};

/// Durable last-committed positions keyed by (consumer, topic).
///
/// A cursor is owned by exactly one consumer. It only moves forward during
/// normal operation; `delete` and out-of-order `put` are operator resets.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Get the last committed position.
    async fn get(&self, consumer: &str, topic: &str) -> Result<Option<OutboxPosition>>;

    /// Store the last committed position (upsert).
    async fn put(&self, consumer: &str, topic: &str, position: OutboxPosition) -> Result<()>;

    /// Remove the cursor.
    async fn delete(&self, consumer: &str, topic: &str) -> Result<()>;
}
