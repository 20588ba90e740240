//! SQLite CursorStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use crate::storage::schema::{self, OutboxCursors};
use crate::storage::{CursorStore, OutboxPosition, Result};

/// SQLite implementation of CursorStore.
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    /// Create a new SQLite cursor store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the cursor table.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(schema::SQLITE_CREATE_CURSORS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn get(&self, consumer: &str, topic: &str) -> Result<Option<OutboxPosition>> {
        let query = Query::select()
            .columns([OutboxCursors::TransactionId, OutboxCursors::Sequence])
            .from(OutboxCursors::Table)
            .and_where(Expr::col(OutboxCursors::Consumer).eq(consumer))
            .and_where(Expr::col(OutboxCursors::Topic).eq(topic))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => Ok(Some(OutboxPosition::new(
                row.try_get("transaction_id")?,
                row.try_get("sequence")?,
            ))),
            None => Ok(None),
        }
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
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;

        Ok(())
    }

    async fn delete(&self, consumer: &str, topic: &str) -> Result<()> {
        let query = Query::delete()
            .from_table(OutboxCursors::Table)
            .and_where(Expr::col(OutboxCursors::Consumer).eq(consumer))
            .and_where(Expr::col(OutboxCursors::Topic).eq(topic))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::connect_in_memory;

    async fn store() -> SqliteCursorStore {
        let pool = connect_in_memory().await.unwrap();
        let store = SqliteCursorStore::new(pool);
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_get_missing_cursor() {
        let store = store().await;
        assert_eq!(store.get("relay", "events_to_forward").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_upserts() {
        let store = store().await;

        store
            .put("relay", "events_to_forward", OutboxPosition::at_sequence(1))
            .await
            .unwrap();
        store
            .put("relay", "events_to_forward", OutboxPosition::new(4, 9))
            .await
            .unwrap();

        assert_eq!(
            store.get("relay", "events_to_forward").await.unwrap(),
            Some(OutboxPosition::new(4, 9))
        );
    }

    #[tokio::test]
    async fn test_cursors_are_keyed_by_consumer_and_topic() {
        let store = store().await;
        store.put("a", "t", OutboxPosition::at_sequence(1)).await.unwrap();
        store.put("b", "t", OutboxPosition::at_sequence(2)).await.unwrap();
        store.put("a", "u", OutboxPosition::at_sequence(3)).await.unwrap();

        assert_eq!(store.get("a", "t").await.unwrap(), Some(OutboxPosition::at_sequence(1)));
        assert_eq!(store.get("b", "t").await.unwrap(), Some(OutboxPosition::at_sequence(2)));
        assert_eq!(store.get("a", "u").await.unwrap(), Some(OutboxPosition::at_sequence(3)));
    }

    #[tokio::test]
    async fn test_delete_removes_cursor() {
        let store = store().await;
        store.put("a", "t", OutboxPosition::at_sequence(5)).await.unwrap();

        store.delete("a", "t").await.unwrap();

        assert_eq!(store.get("a", "t").await.unwrap(), None);
    }
}
