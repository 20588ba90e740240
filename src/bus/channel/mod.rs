//! In-memory channel-based broker for single-process runs.
//!
//! Each topic is an append-only log held in process memory. Consumer groups
//! keep a committed offset into that log and have at most one message in
//! flight at a time, so delivery within a group is strictly ordered. A nack,
//! or dropping a delivery without settling it, makes the same message
//! available again.
//!
//! Ideal for local development and testing without external dependencies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{Acknowledger, BusError, Delivery, Publisher, Result, Subscriber, Subscription};
use crate::envelope::Envelope;

#[derive(Default)]
struct GroupState {
    committed: usize,
    in_flight: bool,
}

#[derive(Default)]
struct TopicLog {
    messages: Vec<Envelope>,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct Shared {
    topics: Mutex<HashMap<String, TopicLog>>,
    changed: Notify,
}

impl Shared {
    fn topics(&self) -> Result<MutexGuard<'_, HashMap<String, TopicLog>>> {
        self.topics
            .lock()
            .map_err(|_| BusError::Connection("channel broker state poisoned".to_string()))
    }
}

/// In-memory broker with durable-for-the-process topics and consumer groups.
///
/// Cloning shares the same topics.
#[derive(Clone, Default)]
pub struct ChannelBroker {
    shared: Arc<Shared>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        info!("Channel broker initialized");
        Self::default()
    }

    /// All messages ever published to `topic`, in order.
    pub fn messages(&self, topic: &str) -> Vec<Envelope> {
        self.shared
            .topics()
            .map(|topics| {
                topics
                    .get(topic)
                    .map(|log| log.messages.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Committed offset of `consumer_group` on `topic`, if the group exists.
    pub fn committed_offset(&self, topic: &str, consumer_group: &str) -> Option<usize> {
        let topics = self.shared.topics().ok()?;
        topics
            .get(topic)?
            .groups
            .get(consumer_group)
            .map(|group| group.committed)
    }

    /// Messages on `topic` not yet acknowledged by `consumer_group`.
    pub fn pending(&self, topic: &str, consumer_group: &str) -> usize {
        let total = self.messages(topic).len();
        total - self.committed_offset(topic, consumer_group).unwrap_or(0).min(total)
    }
}

#[async_trait]
impl Publisher for ChannelBroker {
    #[tracing::instrument(name = "channel.publish", skip_all, fields(topic = %topic, type_name = %envelope.type_name))]
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<()> {
        let offset = {
            let mut topics = self.shared.topics()?;
            let log = topics.entry(topic.to_string()).or_default();
            log.messages.push(envelope);
            log.messages.len() - 1
        };

        debug!(offset, "Published envelope to channel topic");
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Subscriber for ChannelBroker {
    async fn subscribe(&self, topic: &str, consumer_group: &str) -> Result<Box<dyn Subscription>> {
        {
            let mut topics = self.shared.topics()?;
            topics
                .entry(topic.to_string())
                .or_default()
                .groups
                .entry(consumer_group.to_string())
                .or_default();
        }

        info!(topic = %topic, consumer_group = %consumer_group, "Channel subscription opened");

        Ok(Box::new(ChannelSubscription {
            shared: self.shared.clone(),
            topic: topic.to_string(),
            consumer_group: consumer_group.to_string(),
        }))
    }
}

struct ChannelSubscription {
    shared: Arc<Shared>,
    topic: String,
    consumer_group: String,
}

impl ChannelSubscription {
    /// Claim the next message for this group if none is in flight.
    fn try_claim(&self) -> Result<Option<Delivery>> {
        let mut topics = self.shared.topics()?;
        let Some(log) = topics.get_mut(&self.topic) else {
            return Ok(None);
        };
        let Some(envelope) = log
            .groups
            .get(&self.consumer_group)
            .filter(|group| !group.in_flight)
            .and_then(|group| log.messages.get(group.committed))
            .cloned()
        else {
            return Ok(None);
        };

        let group = log.groups.entry(self.consumer_group.clone()).or_default();
        group.in_flight = true;

        let acker = ChannelAcker {
            shared: self.shared.clone(),
            topic: self.topic.clone(),
            consumer_group: self.consumer_group.clone(),
            offset: group.committed,
            settled: false,
        };

        Ok(Some(Delivery::new(envelope, Box::new(acker))))
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if let Some(delivery) = self.try_claim()? {
                return Ok(Some(delivery));
            }

            changed.await;
        }
    }
}

struct ChannelAcker {
    shared: Arc<Shared>,
    topic: String,
    consumer_group: String,
    offset: usize,
    settled: bool,
}

impl ChannelAcker {
    fn settle(&mut self, commit: bool) -> Result<()> {
        self.settled = true;
        {
            let mut topics = self.shared.topics()?;
            if let Some(group) = topics
                .get_mut(&self.topic)
                .and_then(|log| log.groups.get_mut(&self.consumer_group))
            {
                if commit {
                    group.committed = self.offset + 1;
                }
                group.in_flight = false;
            }
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

impl Acknowledger for ChannelAcker {
    fn ack(mut self: Box<Self>) -> Result<()> {
        self.settle(true)
    }

    fn nack(mut self: Box<Self>) -> Result<()> {
        debug!(
            topic = %self.topic,
            consumer_group = %self.consumer_group,
            offset = self.offset,
            "Message nacked, will be redelivered"
        );
        self.settle(false)
    }
}

impl Drop for ChannelAcker {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.settle(false);
        }
    }
}

#[cfg(test)]
mod tests;
