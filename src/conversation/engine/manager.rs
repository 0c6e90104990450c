//! Conversation tree manager: one owner, one active branching conversation.

use std::sync::Arc;

use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::conversation::core::config::StorageConfig;
use crate::conversation::core::errors::{ChatError, ChatResult, EntityKind};
use crate::conversation::core::ids::{ConversationId, MessageId, UserId};
use crate::conversation::core::message::DecodedMessage;
use crate::conversation::storage::conversation_store::{
    ConversationStore, SqliteConversationStore,
};
use crate::conversation::storage::message_store::{MessageStore, SqliteMessageStore};
use crate::conversation::tree::{self, ConversationTree, DecodedTree, NodeId};

/// Store dependencies for the tree manager.
#[derive(Clone)]
pub struct TreeBackends {
    /// Message store implementation.
    pub messages: Arc<dyn MessageStore>,
    /// Conversation record store implementation.
    pub conversations: Arc<dyn ConversationStore>,
}

impl TreeBackends {
    /// Build `SQLite` backends sharing one connection.
    ///
    /// # Errors
    /// Returns an error if any table cannot be created.
    pub async fn sqlite(conn: Arc<Connection>, config: &StorageConfig) -> ChatResult<Self> {
        let conversations = Arc::new(SqliteConversationStore::new(Arc::clone(&conn), config).await?);
        let messages = Arc::new(SqliteMessageStore::new(conn, config).await?);
        Ok(Self {
            messages,
            conversations,
        })
    }
}

/// Owns the decoded tree of one conversation and the current selection.
///
/// Calls must be serialized by the caller; every operation takes `&mut self`.
pub struct ConversationTreeManager {
    owner: UserId,
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    active: Option<ConversationId>,
    tree: Option<ConversationTree>,
    selected: Option<NodeId>,
}

impl ConversationTreeManager {
    /// Create a manager bound to `owner`, with no active conversation.
    #[must_use]
    pub fn new(owner: UserId, backends: TreeBackends) -> Self {
        Self {
            owner,
            messages: backends.messages,
            conversations: backends.conversations,
            active: None,
            tree: None,
            selected: None,
        }
    }

    /// Owner this manager acts for.
    #[must_use]
    pub const fn owner(&self) -> UserId {
        self.owner
    }

    /// Currently active conversation.
    #[must_use]
    pub const fn active_conversation(&self) -> Option<ConversationId> {
        self.active
    }

    /// Decoded tree, `None` while the conversation has no message.
    #[must_use]
    pub const fn tree(&self) -> Option<&ConversationTree> {
        self.tree.as_ref()
    }

    /// Selected node handle.
    #[must_use]
    pub const fn selected_node(&self) -> Option<NodeId> {
        self.selected
    }

    /// Message referenced by the selected node.
    #[must_use]
    pub fn selected_message(&self) -> Option<MessageId> {
        let (tree, node) = (self.tree.as_ref()?, self.selected?);
        tree.message_id(node)
    }

    /// True until the first node is committed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tree.is_none()
    }

    /// Start a new conversation with an empty tree.
    ///
    /// # Errors
    /// Returns an error if the conversation record cannot be created.
    pub async fn init_conversation(&mut self) -> ChatResult<ConversationId> {
        let record = self
            .conversations
            .create(self.owner, Some(tree::encode_empty()))
            .await?;

        self.active = Some(record.id);
        self.tree = None;
        self.selected = None;
        info!(conversation_id = %record.id, owner = %self.owner, "conversation created");
        Ok(record.id)
    }

    /// Make a stored conversation of this owner active.
    ///
    /// The selection is always cleared.
    ///
    /// # Errors
    /// Returns `Ownership` if another owner holds it, `NotFound` if it does not exist,
    /// `Decode` if the stored tree is malformed.
    pub async fn load_conversation(&mut self, conversation_id: ConversationId) -> ChatResult<()> {
        let owned = self.conversations.list_by_owner(self.owner).await?;
        let Some(record) = owned.into_iter().find(|r| r.id == conversation_id) else {
            return Err(self.conversation_miss(conversation_id).await?);
        };

        let decoded = tree::decode(record.encoded_tree.as_deref())?;
        self.active = Some(conversation_id);
        self.selected = None;
        self.tree = match decoded {
            DecodedTree::Empty => None,
            DecodedTree::Root(tree) => Some(tree),
        };
        info!(
            conversation_id = %conversation_id,
            nodes = self.tree.as_ref().map_or(0, ConversationTree::len),
            "conversation loaded"
        );
        Ok(())
    }

    /// Select the node referencing `message_id`.
    ///
    /// # Errors
    /// Returns `Ownership`/`NotFound` if the message is not part of the active
    /// conversation, `NodeNotFound` if the loaded tree does not reference it.
    pub async fn select_node(&mut self, message_id: MessageId) -> ChatResult<()> {
        let conversation_id = self.require_active()?;
        self.verify_message(conversation_id, message_id).await?;

        let node = self
            .tree
            .as_ref()
            .and_then(|tree| tree.find(message_id))
            .ok_or(ChatError::NodeNotFound(message_id))?;
        self.selected = Some(node);
        debug!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            node = %node,
            "node selected"
        );
        Ok(())
    }

    /// Attach an already persisted message under the selection and select it.
    ///
    /// On an empty tree the message becomes the root. The whole tree is re-encoded and
    /// stored; local state only changes once the store accepted it.
    ///
    /// # Errors
    /// Returns `Ownership`/`NotFound` for foreign messages, `DuplicateNode` if the message
    /// is already in the tree, `NoSelection` if nothing is selected on a non-empty tree.
    pub async fn append_branch(&mut self, message_id: MessageId) -> ChatResult<NodeId> {
        let conversation_id = self.require_active()?;
        self.verify_message(conversation_id, message_id).await?;

        let (candidate, node) = match &self.tree {
            None => {
                let tree = ConversationTree::with_root(message_id);
                let root = tree.root();
                (tree, root)
            }
            Some(current) => {
                if current.find(message_id).is_some() {
                    return Err(ChatError::DuplicateNode(message_id));
                }
                let parent = self.selected.ok_or(ChatError::NoSelection)?;
                let mut tree = current.clone();
                let node = tree.append_child(parent, message_id)?;
                (tree, node)
            }
        };

        let blob = tree::encode(&candidate)?;
        self.conversations.update(conversation_id, blob).await?;

        info!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            depth = candidate.depth(node),
            nodes = candidate.len(),
            "branch committed"
        );
        self.tree = Some(candidate);
        self.selected = Some(node);
        Ok(node)
    }

    /// Check that a new message could be attached right now, without touching storage.
    ///
    /// # Errors
    /// Returns `NoActiveConversation` without an active conversation, `NoSelection` if
    /// the tree is non-empty and nothing is selected.
    pub fn can_append(&self) -> ChatResult<ConversationId> {
        let conversation_id = self.require_active()?;
        if self.tree.is_some() && self.selected.is_none() {
            return Err(ChatError::NoSelection);
        }
        Ok(conversation_id)
    }

    /// Message ids from the root to the selection, inclusive.
    ///
    /// # Errors
    /// Returns `NoSelection` if nothing is selected.
    pub fn selected_path(&self) -> ChatResult<Vec<MessageId>> {
        let node = self.selected.ok_or(ChatError::NoSelection)?;
        let tree = self.tree.as_ref().ok_or(ChatError::NoSelection)?;
        tree.path_to(node)
    }

    /// Fetch each message and project it, preserving input order.
    ///
    /// # Errors
    /// Returns `NotFound` on the first id that cannot be resolved.
    pub async fn decode_messages(&self, ids: &[MessageId]) -> ChatResult<Vec<DecodedMessage>> {
        let mut decoded = Vec::with_capacity(ids.len());
        for &id in ids {
            let message = self
                .messages
                .get(id)
                .await?
                .ok_or_else(|| ChatError::not_found(EntityKind::Message, id))?;
            decoded.push(message.decoded());
        }
        debug!(messages = decoded.len(), "path decoded");
        Ok(decoded)
    }

    /// Decoded messages along the selected branch.
    ///
    /// # Errors
    /// Returns `NoSelection` or any `decode_messages` error.
    pub async fn selected_context(&self) -> ChatResult<Vec<DecodedMessage>> {
        let path = self.selected_path()?;
        self.decode_messages(&path).await
    }

    fn require_active(&self) -> ChatResult<ConversationId> {
        self.active.ok_or(ChatError::NoActiveConversation)
    }

    async fn verify_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> ChatResult<()> {
        let members = self.messages.list_by_conversation(conversation_id).await?;
        if members.iter().any(|m| m.id == message_id) {
            return Ok(());
        }

        match self.messages.get(message_id).await? {
            Some(message) => {
                warn!(
                    message_id = %message_id,
                    expected = %conversation_id,
                    actual = %message.conversation_id,
                    "message belongs to another conversation"
                );
                Err(ChatError::ownership(EntityKind::Message, message_id))
            }
            None => Err(ChatError::not_found(EntityKind::Message, message_id)),
        }
    }

    async fn conversation_miss(&self, conversation_id: ConversationId) -> ChatResult<ChatError> {
        match self.conversations.get(conversation_id).await? {
            Some(record) => {
                warn!(
                    conversation_id = %conversation_id,
                    owner = %self.owner,
                    actual_owner = %record.owner_id,
                    "conversation owned by another user"
                );
                Ok(ChatError::ownership(EntityKind::Conversation, conversation_id))
            }
            None => Ok(ChatError::not_found(EntityKind::Conversation, conversation_id)),
        }
    }
}
