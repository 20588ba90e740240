//! User domain: the business side that feeds the outbox.
//!
//! `UserService` writes the `users` table and appends the matching event to
//! the outbox in one SQLite transaction. The relay later forwards the rows,
//! and the handlers in [`handlers`] react to them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_query::{Expr, Iden, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::bus::TopicNaming;
use crate::codec::{CodecError, EnvelopeCodec};
use crate::cqrs::{EventBus, EventBusError};
use crate::outbox::{OutboxConfig, TxPublisher};
use crate::storage::{update_in_tx, TransactionError};

pub mod clients;
pub mod events;
pub mod handlers;

use events::{UserEmailUpdated, UserRegistered};

#[derive(Iden)]
enum Users {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "email"]
    Email,
    #[iden = "registered_at"]
    RegisteredAt,
}

const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    registered_at TEXT NOT NULL
);
"#;

/// Codec with every user event registered.
pub fn event_codec() -> Result<EnvelopeCodec, CodecError> {
    let mut codec = EnvelopeCodec::new();
    codec.register::<UserRegistered>()?;
    codec.register::<UserEmailUpdated>()?;
    Ok(codec)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("User not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored user: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Publish(#[from] EventBusError),

    #[error(transparent)]
    Transaction(Box<TransactionError<UserError>>),
}

impl UserError {
    /// Unwrap a plain rollback into the work's own error.
    fn from_tx(err: TransactionError<UserError>) -> Self {
        match err {
            TransactionError::RolledBack { source } => source,
            other => UserError::Transaction(Box::new(other)),
        }
    }
}

/// Transactional user writes.
pub struct UserService {
    pool: SqlitePool,
    codec: Arc<EnvelopeCodec>,
    outbox_topic: String,
    destination: String,
}

impl UserService {
    pub fn new(pool: SqlitePool, codec: Arc<EnvelopeCodec>, outbox: &OutboxConfig) -> Self {
        Self {
            pool,
            codec,
            outbox_topic: outbox.topic.clone(),
            destination: outbox.destination.clone(),
        }
    }

    /// Create the `users` table.
    pub async fn init(&self) -> Result<(), UserError> {
        sqlx::raw_sql(CREATE_USERS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    #[tracing::instrument(name = "users.register", skip_all)]
    pub async fn register(&self, name: &str, email: &str) -> Result<User, UserError> {
        if name.is_empty() || email.is_empty() {
            return Err(UserError::InvalidInput("name and email are required".into()));
        }

        let user = User {
            id: Uuid::now_v7(),
            name: name.to_string(),
            email: email.to_string(),
            registered_at: Utc::now(),
        };

        let row = user.clone();
        let codec = self.codec.clone();
        let outbox_topic = self.outbox_topic.clone();
        let naming = TopicNaming::Shared(self.destination.clone());

        update_in_tx(&self.pool, move |conn: &mut SqliteConnection| {
            Box::pin(async move {
                let query = Query::insert()
                    .into_table(Users::Table)
                    .columns([Users::Id, Users::Name, Users::Email, Users::RegisteredAt])
                    .values_panic([
                        row.id.to_string().into(),
                        row.name.as_str().into(),
                        row.email.as_str().into(),
                        row.registered_at.to_rfc3339().into(),
                    ])
                    .to_string(SqliteQueryBuilder);
                sqlx::query(&query).execute(&mut *conn).await?;

                let bus = EventBus::new(TxPublisher::new(conn, outbox_topic), codec, naming);
                bus.publish(&UserRegistered {
                    user_id: row.id,
                    name: row.name,
                    email: row.email,
                    registered_at: row.registered_at,
                })
                .await?;
                Ok::<_, UserError>(())
            })
        })
        .await
        .map_err(UserError::from_tx)?;

        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    #[tracing::instrument(name = "users.change_email", skip_all, fields(user_id = %id))]
    pub async fn change_email(&self, id: Uuid, new_email: &str) -> Result<(), UserError> {
        if new_email.is_empty() {
            return Err(UserError::InvalidInput("new_email is required".into()));
        }

        let new_email = new_email.to_string();
        let codec = self.codec.clone();
        let outbox_topic = self.outbox_topic.clone();
        let naming = TopicNaming::Shared(self.destination.clone());

        update_in_tx(&self.pool, move |conn: &mut SqliteConnection| {
            Box::pin(async move {
                let select = Query::select()
                    .column(Users::Email)
                    .from(Users::Table)
                    .and_where(Expr::col(Users::Id).eq(id.to_string()))
                    .to_string(SqliteQueryBuilder);
                let row = sqlx::query(&select).fetch_optional(&mut *conn).await?;
                let old_email: String = match row {
                    Some(row) => row.try_get("email")?,
                    None => return Err(UserError::NotFound(id)),
                };

                info!(%old_email, %new_email, "Changing user email");

                let update = Query::update()
                    .table(Users::Table)
                    .value(Users::Email, new_email.as_str())
                    .and_where(Expr::col(Users::Id).eq(id.to_string()))
                    .to_string(SqliteQueryBuilder);
                let result = sqlx::query(&update).execute(&mut *conn).await?;
                if result.rows_affected() == 0 {
                    return Err(UserError::NotFound(id));
                }

                let bus = EventBus::new(TxPublisher::new(conn, outbox_topic), codec, naming);
                bus.publish(&UserEmailUpdated {
                    user_id: id,
                    new_email,
                    old_email,
                    updated_at: Utc::now(),
                })
                .await?;
                Ok::<_, UserError>(())
            })
        })
        .await
        .map_err(UserError::from_tx)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<User>, UserError> {
        let query = Query::select()
            .columns([Users::Id, Users::Name, Users::Email, Users::RegisteredAt])
            .from(Users::Table)
            .and_where(Expr::col(Users::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&query).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let registered_at: String = row.try_get("registered_at")?;
        let registered_at = DateTime::parse_from_rfc3339(&registered_at)
            .map_err(|e| UserError::Corrupt(format!("registered_at '{}': {}", registered_at, e)))?
            .with_timezone(&Utc);

        Ok(Some(User {
            id,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            registered_at,
        }))
    }
}

#[cfg(test)]
mod tests;
