//! Mock publisher implementation for testing.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, Publisher, Result};
use crate::envelope::Envelope;

/// Records every successful publish; can be told to fail.
#[derive(Default)]
pub struct MockPublisher {
    published: RwLock<Vec<(String, Envelope)>>,
    fail_on_publish: RwLock<bool>,
    /// Number of publishes allowed to succeed before failing, if armed.
    fail_after: RwLock<Option<usize>>,
    attempts: AtomicUsize,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Let `successes` more publishes through, then fail every later one.
    pub async fn fail_after(&self, successes: usize) {
        let already = self.published.read().await.len();
        *self.fail_after.write().await = Some(already + successes);
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn published(&self) -> Vec<(String, Envelope)> {
        self.published.read().await.clone()
    }

    pub async fn take_published(&self) -> Vec<(String, Envelope)> {
        std::mem::take(&mut *self.published.write().await)
    }

    /// Total publish calls, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if *self.fail_on_publish.read().await {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }

        let mut published = self.published.write().await;
        if let Some(limit) = *self.fail_after.read().await {
            if published.len() >= limit {
                return Err(BusError::Publish("Mock publish failure".to_string()));
            }
        }
        published.push((topic.to_string(), envelope));
        Ok(())
    }
}
