//! Conversation record store: metadata plus the encoded tree blob.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::conversation::core::config::StorageConfig;
use crate::conversation::core::errors::{ChatError, ChatResult, EntityKind};
use crate::conversation::core::ids::{ConversationId, UserId};
use crate::conversation::core::record::ConversationRecord;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Conversation record store trait.
pub trait ConversationStore: Send + Sync {
    /// Get a conversation by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: ConversationId) -> StoreFuture<'_, ChatResult<Option<ConversationRecord>>>;

    /// List every conversation owned by `owner_id`, newest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_by_owner(
        &self,
        owner_id: UserId,
    ) -> StoreFuture<'_, ChatResult<Vec<ConversationRecord>>>;

    /// Create a new conversation record.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create(
        &self,
        owner_id: UserId,
        encoded_tree: Option<String>,
    ) -> StoreFuture<'_, ChatResult<ConversationRecord>>;

    /// Replace the encoded tree of an existing conversation.
    ///
    /// # Errors
    /// Returns `NotFound` if no such conversation exists, or a storage error.
    fn update(&self, id: ConversationId, encoded_tree: String) -> StoreFuture<'_, ChatResult<()>>;
}

/// `SQLite` implementation of the conversation store.
pub struct SqliteConversationStore {
    conn: Arc<Connection>,
    table: String,
}

type ConversationRow = (ConversationId, UserId, Option<String>, i64);

fn into_record(row: ConversationRow) -> ChatResult<ConversationRecord> {
    let (id, owner_id, encoded_tree, created_ms) = row;
    let created_at = Utc
        .timestamp_millis_opt(created_ms)
        .single()
        .ok_or_else(|| ChatError::InvalidRecord("invalid created_at timestamp".to_string()))?;
    Ok(ConversationRecord {
        id,
        owner_id,
        encoded_tree,
        created_at,
    })
}

impl SqliteConversationStore {
    /// Initialize the store and create the table if it doesn't exist.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Arc<Connection>, config: &StorageConfig) -> ChatResult<Self> {
        let table = config.conversations_table.clone();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    encoded_tree TEXT,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table_name}_owner
                    ON {table_name} (owner_id, created_at DESC);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl ConversationStore for SqliteConversationStore {
    fn get(&self, id: ConversationId) -> StoreFuture<'_, ChatResult<Option<ConversationRecord>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let row = self
                .conn
                .call(move |conn| {
                    let row: Option<ConversationRow> = conn
                        .query_row(
                            &format!(
                                "SELECT id, owner_id, encoded_tree, created_at
                                 FROM {table} WHERE id = ?1"
                            ),
                            rusqlite::params![id],
                            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            row.map(into_record).transpose()
        })
    }

    fn list_by_owner(
        &self,
        owner_id: UserId,
    ) -> StoreFuture<'_, ChatResult<Vec<ConversationRecord>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT id, owner_id, encoded_tree, created_at
                         FROM {table}
                         WHERE owner_id = ?1
                         ORDER BY created_at DESC, rowid DESC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![owner_id], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                        })?
                        .collect::<Result<Vec<ConversationRow>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            rows.into_iter().map(into_record).collect()
        })
    }

    fn create(
        &self,
        owner_id: UserId,
        encoded_tree: Option<String>,
    ) -> StoreFuture<'_, ChatResult<ConversationRecord>> {
        Box::pin(async move {
            let table = self.table.clone();
            let record = ConversationRecord {
                id: ConversationId::new(),
                owner_id,
                encoded_tree,
                created_at: Utc::now(),
            };
            let (id, tree, created_ms) = (
                record.id,
                record.encoded_tree.clone(),
                record.created_at.timestamp_millis(),
            );

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (id, owner_id, encoded_tree, created_at)
                             VALUES (?1, ?2, ?3, ?4)"
                        ),
                        rusqlite::params![id, owner_id, tree, created_ms],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(record)
        })
    }

    fn update(&self, id: ConversationId, encoded_tree: String) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            let changed = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        &format!("UPDATE {table} SET encoded_tree = ?1 WHERE id = ?2"),
                        rusqlite::params![encoded_tree, id],
                    )?;
                    Ok(changed)
                })
                .await?;
            if changed == 0 {
                return Err(ChatError::not_found(EntityKind::Conversation, id));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::storage::database::open_in_memory;

    async fn store() -> SqliteConversationStore {
        let conn = open_in_memory().await.unwrap();
        SqliteConversationStore::new(conn, &StorageConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = store().await;
        let owner = UserId::new();
        let created = store.create(owner, Some("{}".to_string())).await.unwrap();

        let fetched = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.owner_id, owner);
        assert_eq!(fetched.encoded_tree.as_deref(), Some("{}"));
        assert_eq!(
            fetched.created_at.timestamp_millis(),
            created.created_at.timestamp_millis()
        );
        assert!(store.get(ConversationId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_owner_filters() {
        let store = store().await;
        let (alice, bob) = (UserId::new(), UserId::new());
        let first = store.create(alice, None).await.unwrap();
        let second = store.create(alice, None).await.unwrap();
        store.create(bob, None).await.unwrap();

        let ids: Vec<ConversationId> = store
            .list_by_owner(alice)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id) && ids.contains(&second.id));
        assert!(store.list_by_owner(UserId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_blob() {
        let store = store().await;
        let record = store.create(UserId::new(), None).await.unwrap();
        store.update(record.id, "first".to_string()).await.unwrap();
        store.update(record.id, "second".to_string()).await.unwrap();

        let fetched = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.encoded_tree.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = store().await;
        let err = store
            .update(ConversationId::new(), "{}".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChatError::NotFound {
                entity: EntityKind::Conversation,
                ..
            }
        ));
    }
}
