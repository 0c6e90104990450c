//! Chat turns: persist messages, branch them into the tree and call the model.

use std::sync::Arc;

use tracing::info;

use crate::conversation::core::errors::{ChatError, ChatResult, EntityKind};
use crate::conversation::core::ids::{ConversationId, MessageId};
use crate::conversation::core::message::{Message, Role};
use crate::conversation::engine::manager::{ConversationTreeManager, TreeBackends};
use crate::conversation::storage::message_store::MessageStore;
use crate::llm::{ChatModel, ModelMessage};

/// Drives a [`ConversationTreeManager`] with a chat model.
pub struct ChatTurns {
    manager: ConversationTreeManager,
    messages: Arc<dyn MessageStore>,
    model: Arc<dyn ChatModel>,
}

impl ChatTurns {
    /// Create the turn driver for `manager`.
    #[must_use]
    pub fn new(
        manager: ConversationTreeManager,
        backends: &TreeBackends,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            manager,
            messages: Arc::clone(&backends.messages),
            model,
        }
    }

    /// Borrow the tree manager.
    #[must_use]
    pub const fn manager(&self) -> &ConversationTreeManager {
        &self.manager
    }

    /// Borrow the tree manager mutably (load, select).
    pub fn manager_mut(&mut self) -> &mut ConversationTreeManager {
        &mut self.manager
    }

    /// Start a conversation, rooted at a system message when `system_prompt` is given.
    ///
    /// # Errors
    /// Returns an error if the conversation or the system message cannot be stored.
    pub async fn start(&mut self, system_prompt: Option<&str>) -> ChatResult<ConversationId> {
        let conversation_id = self.manager.init_conversation().await?;
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            let message = Message::system(conversation_id, self.manager.owner(), prompt);
            self.commit(message).await?;
        }
        Ok(conversation_id)
    }

    /// Branch a user message off the selection and answer it.
    ///
    /// Selecting an earlier node first turns this into an edit.
    ///
    /// # Errors
    /// Returns an error if storage or the model call fails.
    pub async fn send(&mut self, text: &str) -> ChatResult<Message> {
        let conversation_id = self.active()?;
        let message = Message::user(conversation_id, self.manager.owner(), text);
        self.commit(message).await?;
        self.respond().await
    }

    /// Ask the model to continue the selected branch and commit its reply.
    ///
    /// # Errors
    /// Returns `NoSelection` on an empty branch, or a storage/model error.
    pub async fn respond(&mut self) -> ChatResult<Message> {
        let conversation_id = self.active()?;
        let context = self.manager.selected_context().await?;
        let request: Vec<ModelMessage> = context.iter().map(ModelMessage::from).collect();

        let reply = self.model.complete(&request).await?;
        info!(
            conversation_id = %conversation_id,
            model = self.model.model_name(),
            context = request.len(),
            total_tokens = reply.generation.total_tokens,
            "model replied"
        );

        let message = Message::assistant(
            conversation_id,
            self.manager.owner(),
            reply.content,
            Some(reply.generation),
        );
        self.commit(message).await
    }

    /// Produce an alternative reply to `user_message`.
    ///
    /// # Errors
    /// Returns a selection, storage or model error.
    pub async fn regenerate(&mut self, user_message: MessageId) -> ChatResult<Message> {
        self.manager.select_node(user_message).await?;
        self.respond().await
    }

    /// Regenerate around the selection: an assistant reply is replaced by a sibling,
    /// any other message gets a new reply.
    ///
    /// # Errors
    /// Returns `NoSelection` if nothing is selected, or a storage/model error.
    pub async fn regenerate_selected(&mut self) -> ChatResult<Message> {
        let node = self.manager.selected_node().ok_or(ChatError::NoSelection)?;
        let message_id = self.manager.selected_message().ok_or(ChatError::NoSelection)?;
        let message = self
            .messages
            .get(message_id)
            .await?
            .ok_or_else(|| ChatError::not_found(EntityKind::Message, message_id))?;

        let target = if message.role == Role::Assistant {
            let tree = self.manager.tree().ok_or(ChatError::NoSelection)?;
            tree.parent_of(node)
                .and_then(|parent| tree.message_id(parent))
                .ok_or(ChatError::NoSelection)?
        } else {
            message_id
        };
        self.regenerate(target).await
    }

    async fn commit(&mut self, message: Message) -> ChatResult<Message> {
        self.manager.can_append()?;
        let stored = self.messages.create(message).await?;
        self.manager.append_branch(stored.id).await?;
        Ok(stored)
    }

    fn active(&self) -> ChatResult<ConversationId> {
        self.manager
            .active_conversation()
            .ok_or(ChatError::NoActiveConversation)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::conversation::core::config::StorageConfig;
    use crate::conversation::core::ids::UserId;
    use crate::conversation::core::message::GenerationMeta;
    use crate::conversation::storage::database::open_in_memory;
    use crate::llm::{ModelError, ModelFuture, ModelReply};

    /// Replies with a numbered echo and records every request.
    #[derive(Default)]
    struct ScriptedModel {
        requests: Mutex<Vec<Vec<ModelMessage>>>,
    }

    impl ScriptedModel {
        fn request(&self, index: usize) -> Vec<ModelMessage> {
            self.requests.lock().unwrap()[index].clone()
        }
    }

    impl ChatModel for ScriptedModel {
        fn complete<'a>(
            &'a self,
            messages: &'a [ModelMessage],
        ) -> ModelFuture<'a, Result<ModelReply, ModelError>> {
            Box::pin(async move {
                let mut requests = self.requests.lock().unwrap();
                requests.push(messages.to_vec());
                let last = messages.last().map_or("", |m| m.content.as_str());
                Ok(ModelReply {
                    content: format!("reply {} to {last}", requests.len()),
                    generation: GenerationMeta {
                        total_tokens: Some(3),
                        ..GenerationMeta::default()
                    },
                })
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    async fn backends() -> TreeBackends {
        let conn = open_in_memory().await.unwrap();
        TreeBackends::sqlite(conn, &StorageConfig::default())
            .await
            .unwrap()
    }

    fn turns_with(backends: &TreeBackends) -> (ChatTurns, Arc<ScriptedModel>) {
        let model = Arc::new(ScriptedModel::default());
        let manager = ConversationTreeManager::new(UserId::new(), backends.clone());
        (ChatTurns::new(manager, backends, model.clone()), model)
    }

    async fn turns() -> (ChatTurns, Arc<ScriptedModel>) {
        turns_with(&backends().await)
    }

    #[tokio::test]
    async fn test_send_builds_linear_branch() {
        let (mut turns, model) = turns().await;
        turns.start(Some("Be kind.")).await.unwrap();

        let reply = turns.send("hello").await.unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "reply 1 to hello");
        assert_eq!(reply.generation.unwrap().total_tokens, Some(3));

        let roles: Vec<Role> = turns
            .manager()
            .selected_context()
            .await
            .unwrap()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(
            model.request(0),
            vec![
                ModelMessage::new(Role::System, "Be kind."),
                ModelMessage::new(Role::User, "hello"),
            ]
        );
    }

    #[tokio::test]
    async fn test_regenerate_forks_sibling_reply() {
        let (mut turns, model) = turns().await;
        turns.start(None).await.unwrap();
        let first = turns.send("question").await.unwrap();
        let user_message = turns.manager().selected_path().unwrap()[0];

        let second = turns.regenerate(user_message).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(model.request(1), model.request(0));

        let manager = turns.manager();
        let tree = manager.tree().unwrap();
        assert_eq!(tree.children_of(tree.root()).len(), 2);
        assert_eq!(manager.selected_path().unwrap(), vec![user_message, second.id]);
    }

    #[tokio::test]
    async fn test_edit_branches_from_parent() {
        let (mut turns, model) = turns().await;
        turns.start(Some("sys")).await.unwrap();
        turns.send("first try").await.unwrap();
        let root = turns.manager().selected_path().unwrap()[0];

        turns.manager_mut().select_node(root).await.unwrap();
        turns.send("second try").await.unwrap();

        let edited = model.request(1);
        assert_eq!(edited.len(), 2);
        assert_eq!(edited[1].content, "second try");
        assert_eq!(turns.manager().tree().unwrap().leaves().len(), 2);
    }

    #[tokio::test]
    async fn test_regenerate_selected_reply() {
        let (mut turns, _model) = turns().await;
        turns.start(None).await.unwrap();
        turns.send("question").await.unwrap();
        let user_message = turns.manager().selected_path().unwrap()[0];

        let second = turns.regenerate_selected().await.unwrap();
        assert_eq!(
            turns.manager().selected_path().unwrap(),
            vec![user_message, second.id]
        );

        turns.manager_mut().select_node(user_message).await.unwrap();
        turns.regenerate_selected().await.unwrap();
        let tree = turns.manager().tree().unwrap();
        assert_eq!(tree.children_of(tree.root()).len(), 3);
    }

    #[tokio::test]
    async fn test_respond_needs_a_selection() {
        let (mut turns, _model) = turns().await;
        assert!(matches!(
            turns.respond().await,
            Err(ChatError::NoActiveConversation)
        ));
        turns.start(None).await.unwrap();
        assert!(matches!(turns.respond().await, Err(ChatError::NoSelection)));
    }

    #[tokio::test]
    async fn test_send_after_load_without_selection_stores_nothing() {
        let backends = backends().await;
        let (mut turns, model) = turns_with(&backends);
        let conversation = turns.start(None).await.unwrap();
        turns.send("question").await.unwrap();

        turns
            .manager_mut()
            .load_conversation(conversation)
            .await
            .unwrap();
        assert!(matches!(
            turns.send("after load").await,
            Err(ChatError::NoSelection)
        ));

        let stored = backends
            .messages
            .list_by_conversation(conversation)
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(turns.manager().tree().unwrap().len(), 2);
        assert_eq!(model.requests.lock().unwrap().len(), 1);
    }
}
