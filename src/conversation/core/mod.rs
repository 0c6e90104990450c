//! Core conversation types and identifiers.

pub mod config;
pub mod errors;
pub mod ids;
pub mod message;
pub mod record;

pub use config::{ChatConfig, LlmConfig, StorageConfig};
pub use errors::{ChatError, ChatResult, EntityKind};
pub use ids::{ConversationId, MessageId, UserId};
pub use message::{DecodedMessage, GenerationMeta, Message, Role};
pub use record::{ConversationRecord, User};
