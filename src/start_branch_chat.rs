//! Startup helpers for the `branch-chat` binary.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::conversation::core::config::ChatConfig;
use crate::conversation::core::errors::ChatResult;
use crate::conversation::core::ids::MessageId;
use crate::conversation::core::record::User;
use crate::conversation::engine::{ChatTurns, ConversationTreeManager, TreeBackends};
use crate::conversation::storage::{SqliteUserStore, UserStore, open_database};
use crate::conversation::tree::{ConversationTree, NodeId};
use crate::llm::OpenRouterClient;

/// Environment variable naming the local user.
pub const USER_ENV: &str = "BRANCH_CHAT_USER";
/// User name used when [`USER_ENV`] is unset.
pub const DEFAULT_USER: &str = "local";

/// Install a stderr subscriber honoring `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Everything the REPL needs.
pub struct ChatApp {
    /// Effective configuration.
    pub config: ChatConfig,
    /// Resolved local user.
    pub user: User,
    /// Conversation and message stores.
    pub backends: TreeBackends,
    /// Turn driver bound to `user`.
    pub turns: ChatTurns,
}

/// Open storage, resolve the user and connect the model client.
///
/// # Errors
/// Returns an error if the config is invalid, storage cannot be opened, the API key is
/// missing or the configured model is not offered.
pub async fn initialize(config: ChatConfig, user_name: &str) -> ChatResult<ChatApp> {
    config.validate()?;
    let conn = open_database(&config.storage).await?;
    let users = SqliteUserStore::new(Arc::clone(&conn), &config.storage).await?;
    let backends = TreeBackends::sqlite(conn, &config.storage).await?;
    let user = users.ensure(user_name.to_string()).await?;

    let mut client = OpenRouterClient::new(&config.llm)?;
    if config.llm.validate_model {
        client.set_model(&config.llm.model).await?;
    }
    tracing::info!(
        user = %user.name,
        model = %config.llm.model,
        db = %config.storage.sqlite_path.display(),
        "branch-chat ready"
    );

    let manager = ConversationTreeManager::new(user.id, backends.clone());
    let turns = ChatTurns::new(manager, &backends, Arc::new(client));
    Ok(ChatApp {
        config,
        user,
        backends,
        turns,
    })
}

/// One parsed REPL line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReplCommand {
    /// Start a new conversation.
    New,
    /// List the user's conversations.
    List,
    /// Load a conversation by id.
    Load(String),
    /// Print the tree.
    Tree,
    /// Select a message by id.
    Select(String),
    /// Print the selected branch.
    Path,
    /// Regenerate around the selection.
    Regen,
    /// Show help.
    Help,
    /// Exit.
    Quit,
    /// Send text as a user message.
    Send(String),
    /// Blank line.
    Empty,
    /// Unrecognized slash command.
    Unknown(String),
}

impl ReplCommand {
    /// Parse one input line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        if !line.starts_with('/') {
            return Self::Send(line.to_string());
        }

        let (name, arg) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let arg = arg.trim().to_string();
        match (name, arg.is_empty()) {
            ("/new", _) => Self::New,
            ("/list", _) => Self::List,
            ("/load", false) => Self::Load(arg),
            ("/tree", _) => Self::Tree,
            ("/select", false) => Self::Select(arg),
            ("/path", _) => Self::Path,
            ("/regen", _) => Self::Regen,
            ("/help", _) => Self::Help,
            ("/quit" | "/exit", _) => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// REPL help text.
pub const HELP: &str = "\
/new               start a new conversation
/list              list your conversations
/load <id>         load a conversation
/tree              show the conversation tree
/select <msg>      select a message to branch from
/path              show the selected branch
/regen             regenerate the selected reply
/help              show this help
/quit              exit
anything else      send it as a message";

/// Render `tree` as an indented outline, marking the selected node with `*`.
#[must_use]
pub fn render_tree(
    tree: &ConversationTree,
    selected: Option<NodeId>,
    labels: &HashMap<MessageId, String>,
) -> String {
    let mut out = String::new();
    for (node, depth) in tree.preorder_with_depth() {
        let Some(message_id) = tree.message_id(node) else {
            continue;
        };
        let marker = if Some(node) == selected { '*' } else { ' ' };
        let indent = "  ".repeat(depth);
        let label = labels.get(&message_id).map_or("?", String::as_str);
        let _ = writeln!(out, "{marker} {indent}{message_id} {label}");
    }
    out
}

/// Single-line preview of message content.
#[must_use]
pub fn preview(content: &str, max_chars: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ReplCommand::parse("  "), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse("/new"), ReplCommand::New);
        assert_eq!(
            ReplCommand::parse("/load  abc "),
            ReplCommand::Load("abc".to_string())
        );
        assert_eq!(
            ReplCommand::parse("/select"),
            ReplCommand::Unknown("/select".to_string())
        );
        assert_eq!(ReplCommand::parse("/exit"), ReplCommand::Quit);
        assert_eq!(
            ReplCommand::parse("hello there"),
            ReplCommand::Send("hello there".to_string())
        );
    }

    #[test]
    fn test_render_marks_selection() {
        let (a, b, c) = (MessageId::new(), MessageId::new(), MessageId::new());
        let mut tree = ConversationTree::with_root(a);
        let nb = tree.append_child(tree.root(), b).unwrap();
        tree.append_child(tree.root(), c).unwrap();
        let labels = HashMap::from([(a, "root".to_string()), (b, "left".to_string())]);

        let rendered = render_tree(&tree, Some(nb), &labels);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("  {a} root"));
        assert_eq!(lines[1], format!("*   {b} left"));
        assert_eq!(lines[2], format!("    {c} ?"));
    }

    #[test]
    fn test_render_indents_nested_branches() {
        let ids: Vec<MessageId> = (0..4).map(|_| MessageId::new()).collect();
        let mut tree = ConversationTree::with_root(ids[0]);
        let a = tree.append_child(tree.root(), ids[1]).unwrap();
        let a1 = tree.append_child(a, ids[2]).unwrap();
        tree.append_child(tree.root(), ids[3]).unwrap();

        let rendered = render_tree(&tree, Some(a1), &HashMap::new());
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!("  {} ?", ids[0]),
                format!("    {} ?", ids[1]),
                format!("*     {} ?", ids[2]),
                format!("    {} ?", ids[3]),
            ]
        );
    }

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("a\n b", 10), "a b");
        assert_eq!(preview("こんにちは世界", 5), "こんにちは…");
    }
}
