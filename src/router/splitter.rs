//! Splitter: fans one shared topic out into one topic per event type.
//!
//! Each input envelope is republished unchanged to the topic named after its
//! type name, so per-type consumers get their own ordering and offsets.

use std::sync::Arc;

use crate::bus::{Publisher, TopicNaming};
use crate::envelope::Envelope;

use super::{HandlerError, HandlerRegistration};

/// Forward the envelope as-is. The router picks the topic from its type.
pub async fn split(envelope: Envelope) -> Result<Vec<Envelope>, HandlerError> {
    Ok(vec![envelope])
}

/// Splitter registration consuming `topic` as consumer group `name`.
pub fn registration(
    name: impl Into<String>,
    topic: impl Into<String>,
    publisher: Arc<dyn Publisher>,
) -> HandlerRegistration {
    HandlerRegistration::transform(name, topic, TopicNaming::PerType, publisher, split)
}
