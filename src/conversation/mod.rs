//! Branching conversation subsystem.
//!
//! - `core`: configuration, errors, ids and records
//! - `tree`: arena node graph and its persisted encoding
//! - `storage`: `SQLite` stores for conversations, messages and users
//! - `engine`: tree manager and chat turn orchestration

pub mod core;
pub mod engine;
pub mod storage;
pub mod tree;

pub use core::{
    ChatConfig, ChatError, ChatResult, ConversationId, ConversationRecord, DecodedMessage,
    EntityKind, GenerationMeta, LlmConfig, Message, MessageId, Role, StorageConfig, User, UserId,
};
pub use engine::{ChatTurns, ConversationTreeManager, TreeBackends};
pub use storage::{
    ConversationStore, MessageStore, SqliteConversationStore, SqliteMessageStore, SqliteUserStore,
    StoreFuture, UserStore, open_database, open_in_memory,
};
pub use tree::{ConversationTree, DecodedTree, NodeId, TreeNode};
