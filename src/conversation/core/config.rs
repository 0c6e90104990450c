//! Configuration for the conversation subsystem.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::conversation::core::errors::{ChatError, ChatResult};

/// Environment variable overriding [`StorageConfig::sqlite_path`].
pub const DB_PATH_ENV: &str = "BRANCH_CHAT_DB";
/// Environment variable overriding [`LlmConfig::model`].
pub const MODEL_ENV: &str = "BRANCH_CHAT_MODEL";
/// Environment variable overriding [`LlmConfig::base_url`].
pub const BASE_URL_ENV: &str = "BRANCH_CHAT_BASE_URL";
/// Environment variable overriding [`LlmConfig::system_prompt`].
pub const SYSTEM_PROMPT_ENV: &str = "BRANCH_CHAT_SYSTEM_PROMPT";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Model API settings.
    pub llm: LlmConfig,
}

impl ChatConfig {
    /// Defaults overlaid with `BRANCH_CHAT_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary lookup.
    ///
    /// Empty values are ignored, except for the system prompt where an empty
    /// string disables it.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = non_empty(DB_PATH_ENV) {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(model) = non_empty(MODEL_ENV) {
            config.llm.model = model;
        }
        if let Some(base_url) = non_empty(BASE_URL_ENV) {
            config.llm.base_url = base_url;
        }
        if let Some(prompt) = lookup(SYSTEM_PROMPT_ENV) {
            config.llm.system_prompt = Some(prompt).filter(|p| !p.trim().is_empty());
        }
        config
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        for (field, table) in [
            ("storage.users_table", &self.storage.users_table),
            ("storage.conversations_table", &self.storage.conversations_table),
            ("storage.messages_table", &self.storage.messages_table),
        ] {
            if !is_sql_identifier(table) {
                return Err(ChatError::InvalidConfig(format!(
                    "{field} must be a plain SQL identifier, got {table:?}"
                )));
            }
        }

        if self.llm.model.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "llm.model must not be empty".to_string(),
            ));
        }

        if self.llm.api_key_env.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "llm.api_key_env must not be empty".to_string(),
            ));
        }

        if self.llm.connect_timeout_secs == 0 || self.llm.request_timeout_secs == 0 {
            return Err(ChatError::InvalidConfig(
                "llm timeouts must be > 0".to_string(),
            ));
        }

        Url::parse(&self.llm.base_url)?;
        Ok(())
    }
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Users table name.
    pub users_table: String,
    /// Conversations table name.
    pub conversations_table: String,
    /// Messages table name.
    pub messages_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/branch_chat.sqlite"),
            users_table: "users".to_string(),
            conversations_table: "conversations".to_string(),
            messages_table: "messages".to_string(),
        }
    }
}

/// Model API settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model routing name.
    pub model: String,
    /// API base URL; `chat/completions` and `models` are resolved against it.
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Check the model name against the provider's model list on startup.
    pub validate_model: bool,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// System prompt committed as the root of new conversations.
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-3.5-turbo".to_string(),
            base_url: "https://openrouter.ai/api/v1/".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            validate_model: true,
            connect_timeout_secs: 5,
            request_timeout_secs: 120,
            system_prompt: Some("You are a helpful assistant.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = ChatConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm.model, "openai/gpt-3.5-turbo");
        assert_eq!(config.storage.messages_table, "messages");
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        let mut config = ChatConfig::default();
        config.storage.messages_table = "messages; DROP TABLE users".to_string();
        assert!(matches!(
            config.validate(),
            Err(ChatError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let mut config = ChatConfig::default();
        config.llm.base_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ChatError::Url(_))));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = ChatConfig::default();
        config.llm.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (DB_PATH_ENV, "/tmp/chat.sqlite"),
            (MODEL_ENV, "anthropic/claude-3-haiku"),
            (BASE_URL_ENV, "   "),
            (SYSTEM_PROMPT_ENV, ""),
        ]);
        let config = ChatConfig::from_lookup(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.storage.sqlite_path, PathBuf::from("/tmp/chat.sqlite"));
        assert_eq!(config.llm.model, "anthropic/claude-3-haiku");
        assert_eq!(config.llm.base_url, LlmConfig::default().base_url);
        assert_eq!(config.llm.system_prompt, None);
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "storage": {
                "sqlite_path": "chat.db",
                "users_table": "owners",
                "conversations_table": "chats",
                "messages_table": "utterances"
            },
            "llm": {
                "model": "openai/gpt-4o",
                "base_url": "http://localhost:8080/v1/",
                "api_key_env": "LOCAL_KEY",
                "validate_model": false,
                "connect_timeout_secs": 1,
                "request_timeout_secs": 30,
                "system_prompt": null
            }
        }"#;
        let config: ChatConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.conversations_table, "chats");
        assert!(!config.llm.validate_model);
    }
}
