//! Anthropic messages backend.
//!
//! Unlike the OpenAI dialect, the system prompt travels in a top-level
//! `system` field rather than as the first conversation message.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{
    provider_error, transport_error, ChatMessage, CompletionClient, LlmConfig, Provider, Role,
    TextStream,
};
use crate::error::{Error, Result};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl AnthropicClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        match &self.config.base_url {
            Some(base) => format!("{}/v1/messages", base.trim_end_matches('/')),
            None => ANTHROPIC_API_URL.to_string(),
        }
    }

    fn model(&self) -> &str {
        if self.config.model.is_empty() {
            Provider::Anthropic.default_model()
        } else {
            &self.config.model
        }
    }

    fn build_request(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        stream: bool,
    ) -> AnthropicRequest {
        AnthropicRequest {
            model: self.model().to_string(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: (!system_prompt.is_empty()).then(|| system_prompt.to_string()),
            messages: history
                .iter()
                .filter(|message| message.role != Role::System)
                .cloned()
                .collect(),
            stream,
        }
    }

    async fn send(&self, request: &AnthropicRequest) -> Result<reqwest::Response> {
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let response = self
            .http
            .post(self.endpoint())
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(Provider::Anthropic, status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn complete(&self, system_prompt: &str, history: &[ChatMessage]) -> Result<String> {
        let request = self.build_request(system_prompt, history, false);
        let body: AnthropicResponse = self
            .send(&request)
            .await?
            .json()
            .await
            .map_err(|err| Error::Parse(format!("undecodable Anthropic response: {err}")))?;

        let block = body
            .content
            .into_iter()
            .next()
            .ok_or_else(|| Error::Parse("empty content in Anthropic response".to_string()))?;
        Ok(block.text)
    }

    async fn stream(&self, system_prompt: &str, history: &[ChatMessage]) -> Result<TextStream> {
        let request = self.build_request(system_prompt, history, true);
        let response = self.send(&request).await?;

        let stream = stream! {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => {
                        if let Ok(text) = std::str::from_utf8(&chunk) {
                            buffer.push_str(text);
                        }
                    }
                    Err(err) => {
                        yield Err(transport_error(err));
                        return;
                    }
                }
                while let Some(pos) = buffer.find("\n\n") {
                    let event = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();
                    match stream_delta(&event) {
                        StreamDelta::Chunk(content) => yield Ok(content),
                        StreamDelta::Done => return,
                        StreamDelta::Skip => {}
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

enum StreamDelta {
    Chunk(String),
    Done,
    Skip,
}

/// Decode one SSE event block of the Anthropic stream.
fn stream_delta(event: &str) -> StreamDelta {
    let Some(data) = event.lines().find_map(|line| line.strip_prefix("data: ")) else {
        return StreamDelta::Skip;
    };
    let Ok(frame) = serde_json::from_str::<AnthropicStreamFrame>(data) else {
        return StreamDelta::Skip;
    };
    match frame.kind.as_str() {
        "content_block_delta" => match frame.delta.and_then(|delta| delta.text) {
            Some(text) if !text.is_empty() => StreamDelta::Chunk(text),
            _ => StreamDelta::Skip,
        },
        "message_stop" => StreamDelta::Done,
        _ => StreamDelta::Skip,
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
}

#[derive(Debug, Deserialize, Default)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}
