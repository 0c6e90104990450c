//! Error types for the conversation subsystem.

use std::fmt;

use thiserror::Error;

use crate::conversation::core::ids::MessageId;
use crate::llm::ModelError;

/// Kind of persisted entity an error refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntityKind {
    /// A conversation record.
    Conversation,
    /// A message record.
    Message,
    /// A registered user.
    User,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Conversation => "conversation",
            Self::Message => "message",
            Self::User => "user",
        })
    }
}

/// Conversation subsystem error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Referenced entity is absent from the store.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of the missing entity.
        entity: EntityKind,
        /// Identifier that was looked up.
        id: String,
    },
    /// Entity exists but is not owned by the requester (or belongs to another conversation).
    #[error("{entity} {id} is not accessible from the current owner or conversation")]
    Ownership {
        /// Kind of the entity.
        entity: EntityKind,
        /// Identifier that was looked up.
        id: String,
    },
    /// Persisted tree blob is structurally invalid.
    #[error("encoded tree is malformed: {0}")]
    Decode(String),
    /// Message is valid for the conversation but absent from the loaded tree.
    #[error("message {0} is not part of the loaded tree; reload the conversation")]
    NodeNotFound(MessageId),
    /// Operation requires a selected node.
    #[error("no node is selected")]
    NoSelection,
    /// Operation requires `init_conversation` or `load_conversation` first.
    #[error("no active conversation")]
    NoActiveConversation,
    /// The message is already referenced by a node of the tree.
    #[error("message {0} is already part of the tree")]
    DuplicateNode(MessageId),
    /// A node handle does not belong to the tree it was used with.
    #[error("node {0} does not belong to this tree")]
    DetachedNode(usize),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Stored row could not be mapped back into a record.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Model API failure.
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl ChatError {
    /// Build a `NotFound` error for any displayable id.
    #[must_use]
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Build an `Ownership` error for any displayable id.
    #[must_use]
    pub fn ownership(entity: EntityKind, id: impl fmt::Display) -> Self {
        Self::Ownership {
            entity,
            id: id.to_string(),
        }
    }
}

/// Convenience result alias for conversation operations.
pub type ChatResult<T> = Result<T, ChatError>;
