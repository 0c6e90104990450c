//! Conversation and user records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::core::ids::{ConversationId, UserId};

/// Stored metadata of one branching conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Conversation id.
    pub id: ConversationId,
    /// Owner of the conversation.
    pub owner_id: UserId,
    /// Serialized tree; `None` means no messages yet.
    pub encoded_tree: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A registered owner identity.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Unique display name.
    pub name: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}
