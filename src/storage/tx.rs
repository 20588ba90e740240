//! Transaction helper.
//!
//! Business writes and their outbox rows must commit or roll back together.
//! `update_in_tx` runs a closure against a transaction's connection and
//! settles the transaction from the closure's result.

use futures::future::BoxFuture;
use sqlx::{Database, Pool};
use tracing::{debug, error};

/// Failure of a transactional unit of work.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError<E>
where
    E: std::error::Error + 'static,
{
    #[error("Could not begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    /// The work failed and the transaction was rolled back.
    #[error("{source}")]
    RolledBack {
        #[source]
        source: E,
    },

    /// The work failed and rolling back failed too. Both are kept.
    #[error("{source} (rollback also failed: {rollback})")]
    RollbackFailed {
        #[source]
        source: E,
        rollback: sqlx::Error,
    },

    #[error("Could not commit transaction: {0}")]
    Commit(#[source] sqlx::Error),
}

impl<E> TransactionError<E>
where
    E: std::error::Error + 'static,
{
    /// The work's own error, if the work ran and failed.
    pub fn work_error(&self) -> Option<&E> {
        match self {
            TransactionError::RolledBack { source }
            | TransactionError::RollbackFailed { source, .. } => Some(source),
            TransactionError::Begin(_) | TransactionError::Commit(_) => None,
        }
    }
}

/// Run `work` inside a transaction on `pool`.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err`.
///
/// ```ignore
/// let id = update_in_tx(&pool, |conn| {
///     Box::pin(async move {
///         sqlx::query("INSERT ...").execute(&mut *conn).await?;
///         Ok::<_, MyError>(42)
///     })
/// })
/// .await?;
/// ```
pub async fn update_in_tx<DB, T, E, F>(pool: &Pool<DB>, work: F) -> Result<T, TransactionError<E>>
where
    DB: Database,
    E: std::error::Error + 'static,
    F: for<'c> FnOnce(&'c mut DB::Connection) -> BoxFuture<'c, Result<T, E>>,
{
    let mut tx = pool.begin().await.map_err(TransactionError::Begin)?;

    match work(&mut *tx).await {
        Ok(value) => {
            tx.commit().await.map_err(TransactionError::Commit)?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(source) => match tx.rollback().await {
            Ok(()) => {
                debug!(error = %source, "Transaction rolled back");
                Err(TransactionError::RolledBack { source })
            }
            Err(rollback) => {
                error!(error = %source, rollback_error = %rollback, "Rollback failed");
                Err(TransactionError::RollbackFailed { source, rollback })
            }
        },
    }
}
