//! OpenAI chat-completions backend.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{
    provider_error, transport_error, with_system, ChatMessage, CompletionClient, LlmConfig,
    Provider, TextStream,
};
use crate::error::{Error, Result};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        match &self.config.base_url {
            Some(base) => format!("{}/chat/completions", base.trim_end_matches('/')),
            None => OPENAI_API_URL.to_string(),
        }
    }

    fn model(&self) -> &str {
        if self.config.model.is_empty() {
            Provider::Openai.default_model()
        } else {
            &self.config.model
        }
    }

    fn build_request(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        stream: bool,
    ) -> OpenAiRequest {
        OpenAiRequest {
            model: self.model().to_string(),
            messages: with_system(system_prompt, history),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        }
    }

    async fn send(&self, request: &OpenAiRequest) -> Result<reqwest::Response> {
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let response = self
            .http
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {api_key}"))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(Provider::Openai, status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, system_prompt: &str, history: &[ChatMessage]) -> Result<String> {
        let request = self.build_request(system_prompt, history, false);
        let body: OpenAiResponse = self
            .send(&request)
            .await?
            .json()
            .await
            .map_err(|err| Error::Parse(format!("undecodable OpenAI response: {err}")))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Parse("no choices in OpenAI response".to_string()))?;
        Ok(choice.message.content.unwrap_or_default())
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
                // SSE events end with a blank line.
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

/// Decode one SSE event block. Malformed frames are skipped, never fatal.
fn stream_delta(event: &str) -> StreamDelta {
    let Some(data) = event.lines().find_map(|line| line.strip_prefix("data: ")) else {
        return StreamDelta::Skip;
    };
    if data.trim() == "[DONE]" {
        return StreamDelta::Done;
    }
    let Ok(frame) = serde_json::from_str::<OpenAiStreamFrame>(data) else {
        return StreamDelta::Skip;
    };
    match frame
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(content) if !content.is_empty() => StreamDelta::Chunk(content),
        _ => StreamDelta::Skip,
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFrame {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}
