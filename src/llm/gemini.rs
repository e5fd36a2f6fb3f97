//! Google Gemini backend.
//!
//! Gemini has no system role: the system prompt and user turns are both
//! sent as `user` contents, assistant turns map to the `model` role, and
//! the API key travels as a query parameter. Streaming keeps the default
//! single-chunk fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    provider_error, transport_error, with_system, ChatMessage, CompletionClient, LlmConfig,
    Provider, Role,
};
use crate::error::{Error, Result};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl GeminiClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn model(&self) -> &str {
        if self.config.model.is_empty() {
            Provider::Gemini.default_model()
        } else {
            &self.config.model
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.as_deref().unwrap_or(GEMINI_API_BASE);
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            base.trim_end_matches('/'),
            self.model(),
            api_key
        )
    }

    fn build_request(&self, system_prompt: &str, history: &[ChatMessage]) -> GeminiRequest {
        let contents = with_system(system_prompt, history)
            .into_iter()
            .map(|message| GeminiContent {
                role: match message.role {
                    Role::Assistant => "model",
                    _ => "user",
                }
                .to_string(),
                parts: vec![GeminiPart {
                    text: message.content,
                }],
            })
            .collect();
        GeminiRequest { contents }
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn complete(&self, system_prompt: &str, history: &[ChatMessage]) -> Result<String> {
        let request = self.build_request(system_prompt, history);
        let response = self
            .http
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(Provider::Gemini, status.as_u16(), &body));
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|err| Error::Parse(format!("undecodable Gemini response: {err}")))?;
        let candidate = body
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::Parse("no candidates in Gemini response".to_string()))?;
        let part = candidate
            .content
            .parts
            .into_iter()
            .next()
            .ok_or_else(|| Error::Parse("empty candidate in Gemini response".to_string()))?;
        Ok(part.text)
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiCandidateContent,
}

#[derive(Debug, Deserialize, Default)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}
