//! Message store: immutable message records keyed by id.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::conversation::core::config::StorageConfig;
use crate::conversation::core::errors::{ChatError, ChatResult};
use crate::conversation::core::ids::{ConversationId, MessageId, UserId};
use crate::conversation::core::message::{GenerationMeta, Message, Role};
use crate::conversation::storage::conversation_store::StoreFuture;

/// Message store trait.
pub trait MessageStore: Send + Sync {
    /// Get a message by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, id: MessageId) -> StoreFuture<'_, ChatResult<Option<Message>>>;

    /// List the messages of one conversation in creation order.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Vec<Message>>>;

    /// Persist a new message and return it.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the id already exists.
    fn create(&self, message: Message) -> StoreFuture<'_, ChatResult<Message>>;
}

/// `SQLite` implementation of the message store.
pub struct SqliteMessageStore {
    conn: Arc<Connection>,
    table: String,
}

const COLUMNS: &str = "id, conversation_id, owner_id, role, content, created_at, has_generation,
    generation_id, provider, model, object, created, finish_reason, choice_index,
    message_role, refusal, prompt_tokens, completion_tokens, total_tokens";

struct MessageRow {
    id: MessageId,
    conversation_id: ConversationId,
    owner_id: UserId,
    role: String,
    content: String,
    created_ms: i64,
    has_generation: bool,
    generation_id: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    object: Option<String>,
    created: Option<i64>,
    finish_reason: Option<String>,
    choice_index: Option<i64>,
    message_role: Option<String>,
    refusal: Option<String>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    total_tokens: Option<i64>,
}

impl MessageRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            owner_id: row.get(2)?,
            role: row.get(3)?,
            content: row.get(4)?,
            created_ms: row.get(5)?,
            has_generation: row.get(6)?,
            generation_id: row.get(7)?,
            provider: row.get(8)?,
            model: row.get(9)?,
            object: row.get(10)?,
            created: row.get(11)?,
            finish_reason: row.get(12)?,
            choice_index: row.get(13)?,
            message_role: row.get(14)?,
            refusal: row.get(15)?,
            prompt_tokens: row.get(16)?,
            completion_tokens: row.get(17)?,
            total_tokens: row.get(18)?,
        })
    }

    fn into_message(self) -> ChatResult<Message> {
        let role = Role::from_str(&self.role)
            .map_err(|err| ChatError::InvalidRecord(format!("invalid role: {err}")))?;
        let created_at = Utc
            .timestamp_millis_opt(self.created_ms)
            .single()
            .ok_or_else(|| ChatError::InvalidRecord("invalid created_at timestamp".to_string()))?;

        let generation = if self.has_generation {
            Some(GenerationMeta {
                generation_id: self.generation_id,
                provider: self.provider,
                model: self.model,
                object: self.object,
                created: self.created,
                finish_reason: self.finish_reason,
                choice_index: to_u32(self.choice_index, "choice_index")?,
                message_role: self.message_role,
                refusal: self.refusal,
                prompt_tokens: to_u32(self.prompt_tokens, "prompt_tokens")?,
                completion_tokens: to_u32(self.completion_tokens, "completion_tokens")?,
                total_tokens: to_u32(self.total_tokens, "total_tokens")?,
            })
        } else {
            None
        };

        Ok(Message {
            id: self.id,
            conversation_id: self.conversation_id,
            owner_id: self.owner_id,
            role,
            content: self.content,
            created_at,
            generation,
        })
    }
}

fn to_u32(value: Option<i64>, column: &str) -> ChatResult<Option<u32>> {
    value
        .map(|v| {
            u32::try_from(v)
                .map_err(|_| ChatError::InvalidRecord(format!("{column} out of range: {v}")))
        })
        .transpose()
}

impl SqliteMessageStore {
    /// Initialize the store and create the table if it doesn't exist.
    ///
    /// Messages reference the conversations table, so it is named from the same config.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Arc<Connection>, config: &StorageConfig) -> ChatResult<Self> {
        let table = config.messages_table.clone();
        let table_name = table.clone();
        let conversations = config.conversations_table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL
                        REFERENCES {conversations} (id) ON DELETE CASCADE,
                    owner_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    has_generation INTEGER NOT NULL DEFAULT 0,
                    generation_id TEXT,
                    provider TEXT,
                    model TEXT,
                    object TEXT,
                    created INTEGER,
                    finish_reason TEXT,
                    choice_index INTEGER,
                    message_role TEXT,
                    refusal TEXT,
                    prompt_tokens INTEGER,
                    completion_tokens INTEGER,
                    total_tokens INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_{table_name}_conversation
                    ON {table_name} (conversation_id, created_at);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl MessageStore for SqliteMessageStore {
    fn get(&self, id: MessageId) -> StoreFuture<'_, ChatResult<Option<Message>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let row = self
                .conn
                .call(move |conn| {
                    let row: Option<MessageRow> = conn
                        .query_row(
                            &format!("SELECT {COLUMNS} FROM {table} WHERE id = ?1"),
                            rusqlite::params![id],
                            MessageRow::read,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            row.map(MessageRow::into_message).transpose()
        })
    }

    fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, ChatResult<Vec<Message>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLUMNS} FROM {table}
                         WHERE conversation_id = ?1
                         ORDER BY created_at, rowid"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![conversation_id], MessageRow::read)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    fn create(&self, message: Message) -> StoreFuture<'_, ChatResult<Message>> {
        Box::pin(async move {
            let table = self.table.clone();
            let stored = message.clone();
            let generation = message.generation.unwrap_or_default();
            let has_generation = stored.generation.is_some();
            let created_ms = message.created_at.timestamp_millis();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} ({COLUMNS})
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                                     ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
                        ),
                        rusqlite::params![
                            message.id,
                            message.conversation_id,
                            message.owner_id,
                            message.role.as_str(),
                            message.content,
                            created_ms,
                            has_generation,
                            generation.generation_id,
                            generation.provider,
                            generation.model,
                            generation.object,
                            generation.created,
                            generation.finish_reason,
                            generation.choice_index,
                            generation.message_role,
                            generation.refusal,
                            generation.prompt_tokens,
                            generation.completion_tokens,
                            generation.total_tokens,
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(stored)
        })
    }
}
