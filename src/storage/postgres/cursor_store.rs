//! PostgreSQL CursorStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, PostgresQueryBuilder, Query};
use sqlx::{PgPool, Row};

use crate::storage::schema::{self, OutboxCursors};
use crate::storage::{CursorStore, OutboxPosition, Result};

/// PostgreSQL implementation of CursorStore.
pub struct PostgresCursorStore {
    pool: PgPool,
}

impl PostgresCursorStore {
    /// Create a new PostgreSQL cursor store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize the cursor table.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(schema::POSTGRES_CREATE_CURSORS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for PostgresCursorStore {
    async fn get(&self, consumer: &str, topic: &str) -> Result<Option<OutboxPosition>> {
        let query = Query::select()
            .columns([OutboxCursors::TransactionId, OutboxCursors::Sequence])
            .from(OutboxCursors::Table)
            .and_where(Expr::col(OutboxCursors::Consumer).eq(consumer))
            .and_where(Expr::col(OutboxCursors::Topic).eq(topic))
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;

        row.map(|row| {
            Ok(OutboxPosition::new(
                row.try_get("transaction_id")?,
                row.try_get("sequence")?,
            ))
        })
        .transpose()
    }

    async fn put(&self, consumer: &str, topic: &str, position: OutboxPosition) -> Result<()> {
        let updated_at = chrono::Utc::now().to_rfc3339();

        let query = Query::insert()
            .into_table(OutboxCursors::Table)
            .columns([
                OutboxCursors::Consumer,
                OutboxCursors::Topic,
                OutboxCursors::TransactionId,
                OutboxCursors::Sequence,
                OutboxCursors::UpdatedAt,
            ])
            .values_panic([
                consumer.into(),
                topic.into(),
                position.transaction_id.into(),
                position.sequence.into(),
                updated_at.into(),
            ])
            .on_conflict(
                OnConflict::columns([OutboxCursors::Consumer, OutboxCursors::Topic])
                    .update_columns([
                        OutboxCursors::TransactionId,
                        OutboxCursors::Sequence,
                        OutboxCursors::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .to_string(PostgresQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete(&self, consumer: &str, topic: &str) -> Result<()> {
        let query = Query::delete()
            .from_table(OutboxCursors::Table)
            .and_where(Expr::col(OutboxCursors::Consumer).eq(consumer))
            .and_where(Expr::col(OutboxCursors::Topic).eq(topic))
            .to_string(PostgresQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
