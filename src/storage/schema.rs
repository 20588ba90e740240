//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::{Cond, DeleteStatement, Expr, Iden, Order, Query, SelectStatement};

use crate::storage::OutboxPosition;

/// Outbox table schema.
#[derive(Iden)]
pub enum OutboxMessages {
    Table,
    #[iden = "sequence"]
    Sequence,
    #[iden = "transaction_id"]
    TransactionId,
    #[iden = "topic"]
    Topic,
    #[iden = "destination"]
    Destination,
    #[iden = "envelope_id"]
    EnvelopeId,
    #[iden = "type_name"]
    TypeName,
    #[iden = "payload"]
    Payload,
    #[iden = "metadata"]
    Metadata,
    #[iden = "created_at"]
    CreatedAt,
}

/// Cursor table schema.
#[derive(Iden)]
pub enum OutboxCursors {
    Table,
    #[iden = "consumer"]
    Consumer,
    #[iden = "topic"]
    Topic,
    #[iden = "transaction_id"]
    TransactionId,
    #[iden = "sequence"]
    Sequence,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Columns selected when reading outbox rows, in row order.
pub const OUTBOX_COLUMNS: [OutboxMessages; 9] = [
    OutboxMessages::TransactionId,
    OutboxMessages::Sequence,
    OutboxMessages::Topic,
    OutboxMessages::Destination,
    OutboxMessages::EnvelopeId,
    OutboxMessages::TypeName,
    OutboxMessages::Payload,
    OutboxMessages::Metadata,
    OutboxMessages::CreatedAt,
];

/// SQLite outbox table. Writers are serialized, so the transaction id is 0.
#[cfg(feature = "sqlite")]
pub const SQLITE_CREATE_OUTBOX_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_messages (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id INTEGER NOT NULL DEFAULT 0,
    topic TEXT NOT NULL,
    destination TEXT NOT NULL,
    envelope_id TEXT NOT NULL,
    type_name TEXT NOT NULL,
    payload BLOB NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outbox_messages_topic ON outbox_messages(topic, transaction_id, sequence);
"#;

/// SQLite cursor table.
#[cfg(feature = "sqlite")]
pub const SQLITE_CREATE_CURSORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_cursors (
    consumer TEXT NOT NULL,
    topic TEXT NOT NULL,
    transaction_id INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (consumer, topic)
);
"#;

/// PostgreSQL outbox table.
///
/// `transaction_id` defaults to the writing transaction's id, which lets the
/// reader hold back rows of transactions that are still in flight.
#[cfg(feature = "postgres")]
pub const POSTGRES_CREATE_OUTBOX_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_messages (
    sequence BIGSERIAL PRIMARY KEY,
    transaction_id BIGINT NOT NULL DEFAULT (pg_current_xact_id()::text::bigint),
    topic TEXT NOT NULL,
    destination TEXT NOT NULL,
    envelope_id TEXT NOT NULL,
    type_name TEXT NOT NULL,
    payload BYTEA NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outbox_messages_topic ON outbox_messages(topic, transaction_id, sequence);
"#;

/// PostgreSQL cursor table.
#[cfg(feature = "postgres")]
pub const POSTGRES_CREATE_CURSORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_cursors (
    consumer TEXT NOT NULL,
    topic TEXT NOT NULL,
    transaction_id BIGINT NOT NULL,
    sequence BIGINT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (consumer, topic)
);
"#;

/// Upper bound (exclusive) on transaction ids whose rows are safe to read.
#[cfg(feature = "postgres")]
pub const POSTGRES_VISIBLE_XMIN: &str = "pg_snapshot_xmin(pg_current_snapshot())::text::bigint";

// ============================================================================
// Shared statements
// ============================================================================

/// Rows strictly after `after` in `(transaction_id, sequence)` order.
pub fn position_after(after: OutboxPosition) -> Cond {
    Cond::any()
        .add(Expr::col(OutboxMessages::TransactionId).gt(after.transaction_id))
        .add(
            Cond::all()
                .add(Expr::col(OutboxMessages::TransactionId).eq(after.transaction_id))
                .add(Expr::col(OutboxMessages::Sequence).gt(after.sequence)),
        )
}

/// Rows at or before `through` in `(transaction_id, sequence)` order.
pub fn position_through(through: OutboxPosition) -> Cond {
    Cond::any()
        .add(Expr::col(OutboxMessages::TransactionId).lt(through.transaction_id))
        .add(
            Cond::all()
                .add(Expr::col(OutboxMessages::TransactionId).eq(through.transaction_id))
                .add(Expr::col(OutboxMessages::Sequence).lte(through.sequence)),
        )
}

/// Select the next page of a topic's outbox rows.
///
/// `extra` is ANDed into the filter (e.g. a visibility horizon).
pub fn select_outbox_after(
    topic: &str,
    after: OutboxPosition,
    limit: usize,
    extra: Option<Cond>,
) -> SelectStatement {
    let mut filter = Cond::all()
        .add(Expr::col(OutboxMessages::Topic).eq(topic))
        .add(position_after(after));
    if let Some(extra) = extra {
        filter = filter.add(extra);
    }

    Query::select()
        .columns(OUTBOX_COLUMNS)
        .from(OutboxMessages::Table)
        .cond_where(filter)
        .order_by(OutboxMessages::TransactionId, Order::Asc)
        .order_by(OutboxMessages::Sequence, Order::Asc)
        .limit(limit as u64)
        .to_owned()
}

/// Delete a topic's outbox rows at or before `through`.
pub fn delete_outbox_through(topic: &str, through: OutboxPosition) -> DeleteStatement {
    Query::delete()
        .from_table(OutboxMessages::Table)
        .cond_where(
            Cond::all()
                .add(Expr::col(OutboxMessages::Topic).eq(topic))
                .add(position_through(through)),
        )
        .to_owned()
}

/// Count a topic's outbox rows.
pub fn count_outbox(topic: &str) -> SelectStatement {
    Query::select()
        .expr(Expr::col(OutboxMessages::Sequence).count())
        .from(OutboxMessages::Table)
        .and_where(Expr::col(OutboxMessages::Topic).eq(topic))
        .to_owned()
}
