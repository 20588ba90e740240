//! Typed publish and subscribe over the envelope codec.
//!
//! - [`EventBus`]: publish any registered event, topic picked by
//!   [`TopicNaming`](crate::bus::TopicNaming)
//! - [`EventProcessor`]: register strongly-typed handlers on a [`Router`](crate::router::Router)

mod event_bus;
mod event_processor;

pub use event_bus::{EventBus, EventBusError};
pub use event_processor::{EventProcessor, ProcessorError};
