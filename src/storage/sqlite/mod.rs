//! SQLite implementations of storage interfaces.

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::storage::{Result, StorageConfig, Stores};

mod cursor_store;
mod outbox_store;

pub use cursor_store::SqliteCursorStore;
pub use outbox_store::SqliteOutboxStore;

/// Open a pool for `config.url`, creating the database directory if needed.
pub async fn connect(config: &StorageConfig) -> Result<SqlitePool> {
    if let Some(path) = file_path(&config.url) {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
            }
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

/// Open a private in-memory database.
///
/// Pinned to a single connection that never expires, since every SQLite
/// memory connection is a separate database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Create the outbox and cursor tables and wrap both stores.
pub async fn init_stores(pool: SqlitePool) -> Result<Stores> {
    let outbox = SqliteOutboxStore::new(pool.clone());
    outbox.init().await?;
    let cursors = SqliteCursorStore::new(pool);
    cursors.init().await?;

    Ok(Stores {
        outbox: Arc::new(outbox),
        cursors: Arc::new(cursors),
    })
}

/// Filesystem path of a `sqlite:` URL, or `None` for memory databases.
fn file_path(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(path)
    }
}
