//! SQLite outbox implementation.

use async_trait::async_trait;
use sea_query::{Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::storage::outbox_store::{metadata_json, OutboxRow};
use crate::storage::schema::{self, OutboxMessages};
use crate::storage::{
    NewOutboxRecord, OutboxAppend, OutboxPosition, OutboxRecord, OutboxStore, Result,
};

/// SQLite implementation of OutboxStore.
pub struct SqliteOutboxStore {
    pool: SqlitePool,
}

impl SqliteOutboxStore {
    /// Create a new SQLite outbox store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the outbox table.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(schema::SQLITE_CREATE_OUTBOX_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn read_row(row: &SqliteRow) -> Result<OutboxRecord> {
    OutboxRecord::try_from(OutboxRow {
        transaction_id: row.try_get("transaction_id")?,
        sequence: row.try_get("sequence")?,
        topic: row.try_get("topic")?,
        destination: row.try_get("destination")?,
        envelope_id: row.try_get("envelope_id")?,
        type_name: row.try_get("type_name")?,
        payload: row.try_get("payload")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn fetch_after(
        &self,
        topic: &str,
        after: OutboxPosition,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>> {
        let query =
            schema::select_outbox_after(topic, after, limit, None).to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(read_row).collect()
    }

    async fn purge_through(&self, topic: &str, through: OutboxPosition) -> Result<u64> {
        let query = schema::delete_outbox_through(topic, through).to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, topic: &str) -> Result<u64> {
        let query = schema::count_outbox(topic).to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }
}

#[async_trait]
impl OutboxAppend for SqliteConnection {
    async fn append(&mut self, record: NewOutboxRecord<'_>) -> Result<OutboxPosition> {
        let created_at = chrono::Utc::now().to_rfc3339();
        let metadata = metadata_json(record.envelope)?;

        let query = Query::insert()
            .into_table(OutboxMessages::Table)
            .columns([
                OutboxMessages::Topic,
                OutboxMessages::Destination,
                OutboxMessages::EnvelopeId,
                OutboxMessages::TypeName,
                OutboxMessages::Payload,
                OutboxMessages::Metadata,
                OutboxMessages::CreatedAt,
            ])
            .values_panic([
                record.topic.into(),
                record.destination.into(),
                record.envelope.id.to_string().into(),
                record.envelope.type_name.as_str().into(),
                record.envelope.payload.clone().into(),
                metadata.into(),
                created_at.into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *self).await?;
        let position = OutboxPosition::at_sequence(result.last_insert_rowid());

        debug!(
            topic = %record.topic,
            sequence = position.sequence,
            type_name = %record.envelope.type_name,
            "Appended envelope to outbox"
        );

        Ok(position)
    }
}
