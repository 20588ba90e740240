//! Self-describing message envelope.
//!
//! An `Envelope` is the unit that travels through the outbox, the broker
//! and the router. It carries the event's type name so the receiving side
//! can resolve the concrete shape without out-of-band information.
//!
//! Wire format (JSON):
//! ```json
//! {"id":"...","type_name":"UserRegistered","payload":"<base64>","metadata":{"k":"v"}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered string metadata attached to an envelope.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key carrying the correlation id of the originating request.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// A single event instance in transport form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message id.
    pub id: Uuid,
    /// Stable type name resolving back to exactly one event shape.
    pub type_name: String,
    /// Encoded event body.
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Envelope {
    /// Create an envelope with a fresh id and empty metadata.
    pub fn new(type_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_name: type_name.into(),
            payload,
            metadata: Metadata::new(),
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata value.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Serialize to the JSON wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse from the JSON wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests;
