//! Async `OpenRouter` chat-completions client.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::conversation::core::config::LlmConfig;
use crate::conversation::core::message::GenerationMeta;
use crate::llm::{ChatModel, ModelError, ModelFuture, ModelMessage, ModelReply};

const COMPLETIONS_PATH: &str = "chat/completions";
const MODELS_PATH: &str = "models";
const SUPPORTED_PARAMETERS: &str = "temperature,top_p,tools";

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ModelMessage],
}

/// Full chat-completions response body.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CompletionResponse {
    /// Generation id.
    #[serde(default)]
    pub id: Option<String>,
    /// Upstream provider.
    #[serde(default)]
    pub provider: Option<String>,
    /// Model that served the request.
    #[serde(default)]
    pub model: Option<String>,
    /// Object type.
    #[serde(default)]
    pub object: Option<String>,
    /// Creation time, unix seconds.
    #[serde(default)]
    pub created: Option<i64>,
    /// Returned choices.
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Token accounting.
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// One completion choice.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Choice {
    /// Choice index.
    #[serde(default)]
    pub index: Option<u32>,
    /// Stop reason.
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Generated message.
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

/// Message part of a [`Choice`].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ChoiceMessage {
    /// Reported role.
    #[serde(default)]
    pub role: Option<String>,
    /// Reply text.
    #[serde(default)]
    pub content: Option<String>,
    /// Refusal text.
    #[serde(default)]
    pub refusal: Option<String>,
}

/// Token usage block.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct Usage {
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    /// Completion tokens.
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    /// Total tokens.
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

impl CompletionResponse {
    /// Text of the first choice.
    #[must_use]
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .and_then(|message| message.content.as_deref())
    }

    /// Convert the first choice and usage into a [`ModelReply`].
    ///
    /// # Errors
    /// Returns `MalformedResponse` if there is no choice with text content.
    pub fn into_reply(self) -> Result<ModelReply, ModelError> {
        let mut choices = self.choices.into_iter();
        let choice = choices
            .next()
            .ok_or_else(|| ModelError::MalformedResponse("no choices".to_string()))?;
        let message = choice.message.unwrap_or_default();
        let content = message
            .content
            .ok_or_else(|| ModelError::MalformedResponse("choice has no content".to_string()))?;
        let usage = self.usage.unwrap_or_default();

        Ok(ModelReply {
            content,
            generation: GenerationMeta {
                generation_id: self.id,
                provider: self.provider,
                model: self.model,
                object: self.object,
                created: self.created,
                finish_reason: choice.finish_reason,
                choice_index: choice.index,
                message_role: message.role,
                refusal: message.refusal,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
        })
    }
}

/// Result of [`OpenRouterClient::post_messages`].
#[derive(Clone, Debug)]
pub enum PostReply {
    /// Reply text only.
    Text(String),
    /// Whole response including metadata.
    Full(CompletionResponse),
}

/// Entry of the model listing.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ModelInfo {
    /// Model id, e.g. `openai/gpt-3.5-turbo`.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Context window in tokens.
    #[serde(default)]
    pub context_length: Option<u64>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

/// `OpenRouter` client with a bearer API key.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: Url,
    target_url: Url,
    model: String,
}

impl OpenRouterClient {
    /// Build a client, reading the API key from the variable named in config.
    ///
    /// # Errors
    /// Returns `MissingApiKey` if the variable is unset or blank, or a URL/HTTP error.
    pub fn new(config: &LlmConfig) -> Result<Self, ModelError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ModelError::MissingApiKey(config.api_key_env.clone()))?;
        Self::with_api_key(config, api_key)
    }

    /// Build a client with an explicit API key.
    ///
    /// The configured model is used as is; call [`Self::set_model`] to validate it.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn with_api_key(config: &LlmConfig, api_key: String) -> Result<Self, ModelError> {
        let mut base_url = Url::parse(&config.base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let target_url = base_url.join(COMPLETIONS_PATH)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
            target_url,
            model: config.model.clone(),
        })
    }

    /// Endpoint completions are posted to.
    #[must_use]
    pub const fn target_url(&self) -> &Url {
        &self.target_url
    }

    /// Point completions at another endpoint.
    ///
    /// # Errors
    /// Returns an error if `target_url` does not parse.
    pub fn set_target_url(&mut self, target_url: &str) -> Result<(), ModelError> {
        self.target_url = Url::parse(target_url)?;
        Ok(())
    }

    /// List models supporting temperature, `top_p` and tools.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success status.
    pub async fn fetch_models(&self) -> Result<Vec<ModelInfo>, ModelError> {
        let mut url = self.base_url.join(MODELS_PATH)?;
        url.query_pairs_mut()
            .append_pair("supported_parameters", SUPPORTED_PARAMETERS);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let response = check_status(response).await?;
        let list: ModelList = response.json().await?;
        debug!(models = list.data.len(), "fetched model list");
        Ok(list.data)
    }

    /// Switch to `model` after checking it is offered.
    ///
    /// # Errors
    /// Returns `UnknownModel` if the listing does not contain it.
    pub async fn set_model(&mut self, model: &str) -> Result<(), ModelError> {
        let models = self.fetch_models().await?;
        if !models.iter().any(|info| info.id == model) {
            warn!(model, "model not found in listing");
            return Err(ModelError::UnknownModel(model.to_string()));
        }
        self.model = model.to_string();
        Ok(())
    }

    /// Post a conversation and return the reply text or the full response.
    ///
    /// # Errors
    /// Returns `HttpStatus` for non-success answers, or a transport/parse error.
    pub async fn post_messages(
        &self,
        messages: &[ModelMessage],
        include_metadata: bool,
    ) -> Result<PostReply, ModelError> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
        };
        let response = self
            .client
            .post(self.target_url.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: CompletionResponse = response.json().await?;
        debug!(model = %self.model, messages = messages.len(), "completion received");

        if include_metadata {
            return Ok(PostReply::Full(body));
        }
        body.first_content()
            .map(|text| PostReply::Text(text.to_string()))
            .ok_or_else(|| ModelError::MalformedResponse("choice has no content".to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ModelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(status_error(status.as_u16(), response.text().await))
}

/// Build the `HttpStatus` error, keeping a body read failure in its text.
fn status_error<E: fmt::Display>(status: u16, body: Result<String, E>) -> ModelError {
    let body = match body {
        Ok(body) => body,
        Err(err) => {
            warn!(status, error = %err, "could not read error response body");
            format!("<unreadable body: {err}>")
        }
    };
    warn!(status, body = %body, "model api request failed");
    ModelError::HttpStatus { status, body }
}

impl ChatModel for OpenRouterClient {
    fn complete<'a>(
        &'a self,
        messages: &'a [ModelMessage],
    ) -> ModelFuture<'a, Result<ModelReply, ModelError>> {
        Box::pin(async move {
            match self.post_messages(messages, true).await? {
                PostReply::Full(response) => response.into_reply(),
                PostReply::Text(content) => Ok(ModelReply {
                    content,
                    generation: GenerationMeta::default(),
                }),
            }
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
