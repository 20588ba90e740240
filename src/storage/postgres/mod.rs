//! PostgreSQL implementations of storage interfaces.
//!
//! Rows carry the id of the transaction that wrote them. Concurrent writers
//! can commit out of sequence order, so reads stop at the oldest transaction
//! still in flight.

mod cursor_store;
mod outbox_store;

pub use cursor_store::PostgresCursorStore;
pub use outbox_store::PostgresOutboxStore;
