//! Chat-completion backend.
//!
//! [`ChatBackend`] is the seam between prompt building and the provider;
//! [`OpenAIChat`] talks to any OpenAI-compatible API.

use crate::config::ModelsConfig;
use crate::error::CompareError;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use std::time::Duration;

/// A system + user message pair sent as one completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

impl ChatPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    fn to_messages(&self) -> Vec<ChatCompletionRequestMessage> {
        vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: self.system.clone().into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: self.user.clone().into(),
                name: None,
            }),
        ]
    }
}

/// Produces completion text for a prompt.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Complete `prompt`, generating at most `max_tokens` tokens.
    async fn complete(&self, prompt: &ChatPrompt, max_tokens: u32) -> Result<String, CompareError>;
}

/// Connection settings for an OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    /// API key for authentication.
    pub api_key: String,
}

impl ProviderConfig {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    /// HTTP client shared by chat and speech requests.
    pub fn http_client(&self, models: &ModelsConfig) -> Result<reqwest::Client, CompareError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(models.request_timeout_secs))
            .connect_timeout(Duration::from_secs(models.connect_timeout_secs))
            .build()
            .map_err(|e| CompareError::ConfigError(format!("Failed to create HTTP client: {}", e)))
    }
}

/// Chat completions through `async-openai`.
pub struct OpenAIChat {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIChat {
    pub fn new(
        provider: &ProviderConfig,
        model: impl Into<String>,
        http_client: reqwest::Client,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(&provider.api_key)
            .with_api_base(&provider.api_base);

        Self {
            client: Client::with_config(config).with_http_client(http_client),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAIChat {
    async fn complete(&self, prompt: &ChatPrompt, max_tokens: u32) -> Result<String, CompareError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(max_tokens)
            .messages(prompt.to_messages())
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CompareError::EmptyCompletion(self.model.clone()))
    }
}
