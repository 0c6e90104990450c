//! Message records and their model-call metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::conversation::core::ids::{ConversationId, MessageId, UserId};

/// Author role of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instruction.
    System,
    /// User input.
    User,
    /// Model response.
    Assistant,
}

impl Role {
    /// Stable string form for storage and the model API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// Metadata returned by the model API alongside an assistant reply.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GenerationMeta {
    /// Provider-side generation id.
    pub generation_id: Option<String>,
    /// Upstream provider that served the request.
    pub provider: Option<String>,
    /// Model that produced the reply.
    pub model: Option<String>,
    /// Response object type (e.g. `chat.completion`).
    pub object: Option<String>,
    /// Provider creation time, unix seconds.
    pub created: Option<i64>,
    /// Why generation stopped.
    pub finish_reason: Option<String>,
    /// Index of the choice the reply was taken from.
    pub choice_index: Option<u32>,
    /// Role reported by the provider for the reply.
    pub message_role: Option<String>,
    /// Refusal text, if the model declined.
    pub refusal: Option<String>,
    /// Prompt token count.
    pub prompt_tokens: Option<u32>,
    /// Completion token count.
    pub completion_tokens: Option<u32>,
    /// Total token count.
    pub total_tokens: Option<u32>,
}

/// One immutable exchanged utterance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Owner of the conversation.
    pub owner_id: UserId,
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Model-call metadata, assistant messages only.
    pub generation: Option<GenerationMeta>,
}

impl Message {
    fn build(
        conversation_id: ConversationId,
        owner_id: UserId,
        role: Role,
        content: String,
        generation: Option<GenerationMeta>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            owner_id,
            role,
            content,
            created_at: Utc::now(),
            generation,
        }
    }

    /// Build a system message.
    #[must_use]
    pub fn system(
        conversation_id: ConversationId,
        owner_id: UserId,
        content: impl Into<String>,
    ) -> Self {
        Self::build(conversation_id, owner_id, Role::System, content.into(), None)
    }

    /// Build a user message.
    #[must_use]
    pub fn user(
        conversation_id: ConversationId,
        owner_id: UserId,
        content: impl Into<String>,
    ) -> Self {
        Self::build(conversation_id, owner_id, Role::User, content.into(), None)
    }

    /// Build an assistant message with optional generation metadata.
    #[must_use]
    pub fn assistant(
        conversation_id: ConversationId,
        owner_id: UserId,
        content: impl Into<String>,
        generation: Option<GenerationMeta>,
    ) -> Self {
        Self::build(
            conversation_id,
            owner_id,
            Role::Assistant,
            content.into(),
            generation,
        )
    }

    /// Project into the minimal tuple fed back to the model.
    #[must_use]
    pub fn decoded(&self) -> DecodedMessage {
        DecodedMessage {
            id: self.id,
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Minimal role/content/id projection of a [`Message`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DecodedMessage {
    /// Source message id.
    pub id: MessageId,
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_only_assistant_carries_generation() {
        let conversation = ConversationId::new();
        let owner = UserId::new();
        let user = Message::user(conversation, owner, "hi");
        assert!(user.generation.is_none());

        let meta = GenerationMeta {
            total_tokens: Some(12),
            ..GenerationMeta::default()
        };
        let reply = Message::assistant(conversation, owner, "hello", Some(meta.clone()));
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.generation, Some(meta));
    }

    #[test]
    fn test_decoded_projection() {
        let msg = Message::system(ConversationId::new(), UserId::new(), "be brief");
        let decoded = msg.decoded();
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.role, Role::System);
        assert_eq!(decoded.content, "be brief");
    }
}
