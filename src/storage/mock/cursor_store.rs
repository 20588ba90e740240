//! In-memory cursor store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::storage::{CursorStore, OutboxPosition, Result, StorageError};

type CursorKey = (String, String);

/// Mock cursor store that keeps positions in memory.
#[derive(Default)]
pub struct MockCursorStore {
    cursors: RwLock<HashMap<CursorKey, OutboxPosition>>,
    history: RwLock<Vec<OutboxPosition>>,
    fail_on_put: RwLock<bool>,
}

impl MockCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_put(&self, fail: bool) {
        *self.fail_on_put.write().await = fail;
    }

    /// Every position written with `put`, in order.
    pub async fn history(&self) -> Vec<OutboxPosition> {
        self.history.read().await.clone()
    }
}

#[async_trait]
impl CursorStore for MockCursorStore {
    async fn get(&self, consumer: &str, topic: &str) -> Result<Option<OutboxPosition>> {
        let key = (consumer.to_string(), topic.to_string());
        Ok(self.cursors.read().await.get(&key).copied())
    }

    async fn put(&self, consumer: &str, topic: &str, position: OutboxPosition) -> Result<()> {
        if *self.fail_on_put.read().await {
            return Err(StorageError::Mock("put failed".to_string()));
        }
        let key = (consumer.to_string(), topic.to_string());
        self.cursors.write().await.insert(key, position);
        self.history.write().await.push(position);
        Ok(())
    }

    async fn delete(&self, consumer: &str, topic: &str) -> Result<()> {
        let key = (consumer.to_string(), topic.to_string());
        self.cursors.write().await.remove(&key);
        Ok(())
    }
}
