//! Storage implementations.
//!
//! This module contains:
//! - `OutboxStore` / `OutboxAppend`: read and write sides of the outbox table
//! - `CursorStore`: durable consumer positions
//! - `update_in_tx`: run a closure inside a database transaction
//! - Implementations: SQLite, PostgreSQL, Mock

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

pub mod cursor_store;
pub mod mock;
pub mod outbox_store;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
mod tx;

pub use cursor_store::CursorStore;
pub use mock::{MockCursorStore, MockOutboxConnection, MockOutboxStore};
pub use outbox_store::{NewOutboxRecord, OutboxAppend, OutboxPosition, OutboxRecord, OutboxStore};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresCursorStore, PostgresOutboxStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteCursorStore, SqliteOutboxStore};
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub use tx::{update_in_tx, TransactionError};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Invalid timestamp '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),

    #[error("Mock storage failure: {0}")]
    Mock(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// SQLite file or in-memory database.
    #[default]
    Sqlite,
    /// PostgreSQL.
    Postgres,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Connection URL, e.g. `sqlite:./data/outbox.db?mode=rwc` or `postgres://...`.
    pub url: String,
    /// Maximum pool connections.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Sqlite,
            url: "sqlite:./data/outbox.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Outbox and cursor stores sharing one database.
#[derive(Clone)]
pub struct Stores {
    pub outbox: Arc<dyn OutboxStore>,
    pub cursors: Arc<dyn CursorStore>,
}

/// Initialize storage based on configuration.
///
/// Creates the outbox and cursor tables. A schema failure aborts startup.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Stores, Box<dyn std::error::Error + Send + Sync>> {
    match config.storage_type {
        StorageType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let pool = sqlite::connect(config).await?;
                let stores = sqlite::init_stores(pool).await?;
                info!(storage_type = "sqlite", url = %config.url, "Storage initialized");
                Ok(stores)
            }

            #[cfg(not(feature = "sqlite"))]
            {
                Err("SQLite storage requires the 'sqlite' feature".into())
            }
        }
        StorageType::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(&config.url)
                    .await?;

                let outbox = PostgresOutboxStore::new(pool.clone());
                outbox.init().await?;
                let cursors = PostgresCursorStore::new(pool);
                cursors.init().await?;

                info!(storage_type = "postgres", "Storage initialized");
                Ok(Stores {
                    outbox: Arc::new(outbox),
                    cursors: Arc::new(cursors),
                })
            }

            #[cfg(not(feature = "postgres"))]
            {
                Err("PostgreSQL storage requires the 'postgres' feature".into())
            }
        }
    }
}
