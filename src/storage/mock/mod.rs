//! Mock storage implementations for testing.

mod cursor_store;
mod outbox_store;

pub use cursor_store::MockCursorStore;
pub use outbox_store::{MockOutboxConnection, MockOutboxStore};

#[cfg(test)]
mod tests;
