//! Envelope codec: typed domain events to and from envelopes.
//!
//! Type names are produced by an injected naming function (by default the
//! bare struct name, e.g. `UserRegistered`). Decoding goes through a registry
//! built at startup that maps each type name to a decode function. A type
//! name missing from the registry is reported as
//! [`CodecError::UnknownEventType`], never dropped.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::envelope::{Envelope, Metadata};

/// Errors raised while encoding or decoding events.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to serialize event '{type_name}': {source}")]
    Serialization {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to deserialize event '{type_name}': {source}")]
    Deserialization {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown event type: {type_name}")]
    UnknownEventType { type_name: String },

    #[error("Event type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Event type '{type_name}' is registered for a different Rust type")]
    NameCollision { type_name: String },
}

/// Marker for payloads that can travel through the codec.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> DomainEvent for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Maps a Rust type path (`std::any::type_name`) to a wire type name.
pub type NamingFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

type DecodeFn =
    Arc<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send + Sync>, serde_json::Error> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    type_id: TypeId,
    decode: DecodeFn,
}

/// Strip module path and generic arguments from a Rust type path.
///
/// `my_app::events::UserRegistered` becomes `UserRegistered`.
pub fn struct_name(type_path: &str) -> String {
    let base = type_path.split('<').next().unwrap_or(type_path);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// An event decoded through the registry, still type-erased.
pub struct DecodedEvent {
    type_name: String,
    event: Box<dyn Any + Send + Sync>,
}

impl DecodedEvent {
    /// The envelope type name this event was decoded from.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Check the concrete type.
    pub fn is<E: DomainEvent>(&self) -> bool {
        self.event.is::<E>()
    }

    /// Recover the concrete event, or get `self` back on mismatch.
    pub fn downcast<E: DomainEvent>(self) -> Result<E, Self> {
        match self.event.downcast::<E>() {
            Ok(event) => Ok(*event),
            Err(event) => Err(Self {
                type_name: self.type_name,
                event,
            }),
        }
    }
}

impl std::fmt::Debug for DecodedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedEvent")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Registry-backed JSON codec for domain events.
#[derive(Clone)]
pub struct EnvelopeCodec {
    naming: NamingFn,
    registry: Arc<HashMap<String, Registration>>,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec {
    /// Create a codec naming events by their struct name.
    pub fn new() -> Self {
        Self::with_naming(Arc::new(struct_name))
    }

    /// Create a codec with a custom naming function.
    pub fn with_naming(naming: NamingFn) -> Self {
        Self {
            naming,
            registry: Arc::new(HashMap::new()),
        }
    }

    /// Register an event type for decoding.
    ///
    /// Registering the same type twice is a no-op. Two distinct types that
    /// map to the same name are rejected.
    pub fn register<E: DomainEvent>(&mut self) -> Result<&mut Self, CodecError> {
        let type_name = self.name_of::<E>();
        let type_id = TypeId::of::<E>();

        if let Some(existing) = self.registry.get(&type_name) {
            if existing.type_id != type_id {
                return Err(CodecError::NameCollision { type_name });
            }
            return Ok(self);
        }

        let decode: DecodeFn = Arc::new(
            |bytes: &[u8]| -> Result<Box<dyn Any + Send + Sync>, serde_json::Error> {
                let event: E = serde_json::from_slice(bytes)?;
                Ok(Box::new(event))
            },
        );

        Arc::make_mut(&mut self.registry).insert(type_name, Registration { type_id, decode });
        Ok(self)
    }

    /// Resolve the wire type name for `E`.
    pub fn name_of<E: 'static>(&self) -> String {
        (self.naming)(std::any::type_name::<E>())
    }

    /// Whether a decoder exists for `type_name`.
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.registry.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.keys().cloned().collect();
        names.sort();
        names
    }

    /// Encode an event into a fresh envelope.
    pub fn encode<E: DomainEvent>(&self, event: &E) -> Result<Envelope, CodecError> {
        self.encode_with_metadata(event, Metadata::new())
    }

    /// Encode an event, attaching metadata.
    pub fn encode_with_metadata<E: DomainEvent>(
        &self,
        event: &E,
        metadata: Metadata,
    ) -> Result<Envelope, CodecError> {
        let type_name = self.name_of::<E>();
        let payload = serde_json::to_vec(event).map_err(|source| CodecError::Serialization {
            type_name: type_name.clone(),
            source,
        })?;

        let mut envelope = Envelope::new(type_name, payload);
        envelope.metadata = metadata;
        Ok(envelope)
    }

    /// Decode an envelope through the registry.
    pub fn decode(&self, envelope: &Envelope) -> Result<DecodedEvent, CodecError> {
        let registration = self.registry.get(&envelope.type_name).ok_or_else(|| {
            CodecError::UnknownEventType {
                type_name: envelope.type_name.clone(),
            }
        })?;

        let event =
            (registration.decode)(&envelope.payload).map_err(|source| CodecError::Deserialization {
                type_name: envelope.type_name.clone(),
                source,
            })?;

        Ok(DecodedEvent {
            type_name: envelope.type_name.clone(),
            event,
        })
    }

    /// Decode an envelope that must hold an `E`.
    pub fn decode_as<E: DomainEvent>(&self, envelope: &Envelope) -> Result<E, CodecError> {
        let expected = self.name_of::<E>();
        let decoded = self.decode(envelope)?;
        decoded.downcast::<E>().map_err(|decoded| CodecError::TypeMismatch {
            expected,
            actual: decoded.type_name,
        })
    }
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("registered", &self.registered_types())
            .finish()
    }
}
