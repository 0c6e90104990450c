//! Registered owners.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::info;

use crate::conversation::core::config::StorageConfig;
use crate::conversation::core::errors::{ChatError, ChatResult};
use crate::conversation::core::ids::UserId;
use crate::conversation::core::record::User;
use crate::conversation::storage::conversation_store::StoreFuture;

/// User store trait.
pub trait UserStore: Send + Sync {
    /// Get a user by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: UserId) -> StoreFuture<'_, ChatResult<Option<User>>>;

    /// Get a user by unique name.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_by_name(&self, name: String) -> StoreFuture<'_, ChatResult<Option<User>>>;

    /// Register a new user.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the name is taken.
    fn create(&self, name: String) -> StoreFuture<'_, ChatResult<User>>;

    /// Return the user named `name`, registering it on first use.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn ensure(&self, name: String) -> StoreFuture<'_, ChatResult<User>> {
        Box::pin(async move {
            let name = name.trim().to_string();
            if let Some(user) = self.get_by_name(name.clone()).await? {
                return Ok(user);
            }
            let user = self.create(name).await?;
            info!(user_id = %user.id, name = %user.name, "registered user");
            Ok(user)
        })
    }
}

/// `SQLite` implementation of the user store.
pub struct SqliteUserStore {
    conn: Arc<Connection>,
    table: String,
}

type UserRow = (UserId, String, i64);

fn into_user(row: UserRow) -> ChatResult<User> {
    let (id, name, created_ms) = row;
    let created_at = Utc
        .timestamp_millis_opt(created_ms)
        .single()
        .ok_or_else(|| ChatError::InvalidRecord("invalid created_at timestamp".to_string()))?;
    Ok(User {
        id,
        name,
        created_at,
    })
}

impl SqliteUserStore {
    /// Initialize the store and create the table if it doesn't exist.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Arc<Connection>, config: &StorageConfig) -> ChatResult<Self> {
        let table = config.users_table.clone();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    created_at INTEGER NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }

    async fn query_one(&self, column: &'static str, value: String) -> ChatResult<Option<User>> {
        let table = self.table.clone();
        let row = self
            .conn
            .call(move |conn| {
                let row: Option<UserRow> = conn
                    .query_row(
                        &format!("SELECT id, name, created_at FROM {table} WHERE {column} = ?1"),
                        rusqlite::params![value],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(into_user).transpose()
    }
}

impl UserStore for SqliteUserStore {
    fn get(&self, id: UserId) -> StoreFuture<'_, ChatResult<Option<User>>> {
        Box::pin(self.query_one("id", id.to_string()))
    }

    fn get_by_name(&self, name: String) -> StoreFuture<'_, ChatResult<Option<User>>> {
        Box::pin(self.query_one("name", name))
    }

    fn create(&self, name: String) -> StoreFuture<'_, ChatResult<User>> {
        Box::pin(async move {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ChatError::InvalidRecord("user name must not be empty".to_string()));
            }
            let table = self.table.clone();
            let user = User {
                id: UserId::new(),
                name,
                created_at: Utc::now(),
            };
            let (id, row_name, created_ms) = (
                user.id,
                user.name.clone(),
                user.created_at.timestamp_millis(),
            );

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!("INSERT INTO {table} (id, name, created_at) VALUES (?1, ?2, ?3)"),
                        rusqlite::params![id, row_name, created_ms],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(user)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::storage::database::open_in_memory;

    async fn store() -> SqliteUserStore {
        let conn = open_in_memory().await.unwrap();
        SqliteUserStore::new(conn, &StorageConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = store().await;
        let user = store.create("ada".to_string()).await.unwrap();

        assert_eq!(store.get(user.id).await.unwrap().unwrap().name, "ada");
        assert_eq!(
            store.get_by_name("ada".to_string()).await.unwrap().unwrap().id,
            user.id
        );
        assert!(store.get(UserId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_names_are_unique() {
        let store = store().await;
        store.create("ada".to_string()).await.unwrap();
        assert!(store.create("ada".to_string()).await.is_err());
        assert!(store.create("   ".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let store = store().await;
        let first = store.ensure("grace".to_string()).await.unwrap();
        let second = store.ensure("grace".to_string()).await.unwrap();
        assert_eq!(first.id, second.id);
    }
}
