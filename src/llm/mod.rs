//! Chat model collaborator: request/response shapes and the `OpenRouter` client.

pub mod openrouter;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::core::message::{DecodedMessage, GenerationMeta, Role};

pub use openrouter::{CompletionResponse, ModelInfo, OpenRouterClient, PostReply};

/// Boxed future type for model calls.
pub type ModelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors produced by model API calls.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The API key environment variable is not set.
    #[error("API key not found; set the {0} environment variable")]
    MissingApiKey(String),
    /// The requested model is not offered by the API.
    #[error("model {0} is not available")]
    UnknownModel(String),
    /// The API answered with a non-success status.
    #[error("http status {status}: {body}")]
    HttpStatus {
        /// Status code.
        status: u16,
        /// Response body text.
        body: String,
    },
    /// Transport or body decoding error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response lacked the expected fields.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    /// Endpoint URL could not be built.
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

/// One `{role, content}` pair of a completion request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl ModelMessage {
    /// Build a message.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&DecodedMessage> for ModelMessage {
    fn from(message: &DecodedMessage) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

/// Reply text plus whatever metadata the API reported.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModelReply {
    /// Assistant text.
    pub content: String,
    /// Generation metadata.
    pub generation: GenerationMeta,
}

/// Trait abstraction over chat completion backends.
pub trait ChatModel: Send + Sync {
    /// Complete the conversation given in chronological order.
    ///
    /// # Errors
    /// Returns an error if the request fails or the response is malformed.
    fn complete<'a>(
        &'a self,
        messages: &'a [ModelMessage],
    ) -> ModelFuture<'a, Result<ModelReply, ModelError>>;

    /// Identifier of the model used for completions.
    fn model_name(&self) -> &str;
}
