//! Outbox Relay - transactional outbox with a typed event router
//!
//! Domain events are written to an outbox table inside the same database
//! transaction as the business change, relayed to a broker in order, split
//! into per-type topics and dispatched to strongly-typed handlers.

pub mod bus;
pub mod codec;
pub mod config;
pub mod cqrs;
pub mod envelope;
pub mod outbox;
pub mod router;
pub mod runtime;
pub mod storage;
#[cfg(feature = "sqlite")]
pub mod users;
pub mod utils;

pub use codec::{CodecError, DomainEvent, EnvelopeCodec};
pub use envelope::{Envelope, Metadata};
