//! Persistence adapters for conversations, messages and users.

pub mod conversation_store;
pub mod database;
pub mod message_store;
pub mod user_store;

pub use conversation_store::{ConversationStore, SqliteConversationStore, StoreFuture};
pub use database::{open_database, open_in_memory};
pub use message_store::{MessageStore, SqliteMessageStore};
pub use user_store::{SqliteUserStore, UserStore};
