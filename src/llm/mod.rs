//! Uniform gateway over completion providers.
//!
//! Four backends speak four different wire dialects; everything above this
//! module sees one trait: a system prompt plus conversation history in, a
//! full completion or a chunk stream out. Backend selection happens once,
//! when the gateway is built from an [`LlmConfig`].

mod anthropic;
mod gemini;
mod local;
mod openai;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use local::LocalClient;
pub use openai::OpenAiClient;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Chunk stream returned by [`CompletionClient::stream`].
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Role of one conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of the uniform conversation shape handed to providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Supported completion backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Openai,
    Anthropic,
    Gemini,
    Local,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Local => "local",
        }
    }

    /// Model used when the configuration leaves `model` empty.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Openai => "gpt-4o",
            Provider::Anthropic => "claude-3-5-sonnet-20241022",
            Provider::Gemini => "gemini-pro",
            Provider::Local => "llama2",
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            Provider::Openai => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Gemini => "Gemini",
            Provider::Local => "Local LLM",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion provider configuration, persisted by the settings store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmConfig {
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Openai,
            api_key: None,
            model: Provider::Openai.default_model().to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// A completion backend.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Resolve the full assistant text for one request.
    async fn complete(&self, system_prompt: &str, history: &[ChatMessage]) -> Result<String>;

    /// Stream the assistant text chunk by chunk.
    ///
    /// Backends without native streaming keep this default implementation,
    /// which completes first and then yields the whole text as one chunk.
    async fn stream(&self, system_prompt: &str, history: &[ChatMessage]) -> Result<TextStream> {
        let text = self.complete(system_prompt, history).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}

/// Dispatches completion requests to the configured backend.
pub struct CompletionGateway {
    inner: Box<dyn CompletionClient>,
    provider: Provider,
}

impl CompletionGateway {
    pub fn new(config: LlmConfig) -> Self {
        let provider = config.provider;
        let inner: Box<dyn CompletionClient> = match provider {
            Provider::Openai => Box::new(OpenAiClient::new(config)),
            Provider::Anthropic => Box::new(AnthropicClient::new(config)),
            Provider::Gemini => Box::new(GeminiClient::new(config)),
            Provider::Local => Box::new(LocalClient::new(config)),
        };
        Self { inner, provider }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }
}

#[async_trait]
impl CompletionClient for CompletionGateway {
    async fn complete(&self, system_prompt: &str, history: &[ChatMessage]) -> Result<String> {
        self.inner.complete(system_prompt, history).await
    }

    async fn stream(&self, system_prompt: &str, history: &[ChatMessage]) -> Result<TextStream> {
        self.inner.stream(system_prompt, history).await
    }
}

/// Prepend the system prompt as the first message of the conversation.
pub(crate) fn with_system(system_prompt: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::new(Role::System, system_prompt));
    messages.extend_from_slice(history);
    messages
}

/// Map a transport-level reqwest failure into the error taxonomy.
pub(crate) fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Transport(format!("request timed out: {err}"))
    } else if err.is_connect() {
        Error::Transport(format!("connection failed: {err}"))
    } else {
        Error::Transport(format!("request failed: {err}"))
    }
}

/// Build a provider error from a non-success response body.
///
/// Providers wrap failures as `{"error": {"message": ...}}` or
/// `{"error": "..."}`; anything else gets a generic status-code message.
pub(crate) fn provider_error(provider: Provider, status: u16, body: &str) -> Error {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            error
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| error.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("{} API error (status {status})", provider.display_name()));
    Error::Provider { status, message }
}
