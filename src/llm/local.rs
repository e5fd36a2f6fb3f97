//! Self-hosted backend speaking the Ollama chat API.
//!
//! No auth, no sampling options; the conversation is passed through with
//! the system prompt as the first message. Streaming keeps the default
//! single-chunk fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    provider_error, transport_error, with_system, ChatMessage, CompletionClient, LlmConfig,
    Provider,
};
use crate::error::{Error, Result};

const LOCAL_API_BASE: &str = "http://localhost:11434";

pub struct LocalClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LocalClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn model(&self) -> &str {
        if self.config.model.is_empty() {
            Provider::Local.default_model()
        } else {
            &self.config.model
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.as_deref().unwrap_or(LOCAL_API_BASE);
        format!("{}/api/chat", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionClient for LocalClient {
    async fn complete(&self, system_prompt: &str, history: &[ChatMessage]) -> Result<String> {
        let request = LocalRequest {
            model: self.model().to_string(),
            messages: with_system(system_prompt, history),
            stream: false,
        };
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
            return Err(provider_error(Provider::Local, status.as_u16(), &body));
        }

        let body: LocalResponse = response
            .json()
            .await
            .map_err(|err| Error::Parse(format!("undecodable local response: {err}")))?;
        Ok(body.message.content)
    }
}

#[derive(Debug, Serialize)]
struct LocalRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct LocalResponse {
    #[serde(default)]
    message: LocalMessage,
}

#[derive(Debug, Deserialize, Default)]
struct LocalMessage {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn the_endpoint_defaults_to_a_local_ollama() {
        let client = LocalClient::new(LlmConfig {
            provider: Provider::Local,
            model: String::new(),
            ..LlmConfig::default()
        });
        assert_eq!(client.endpoint(), "http://localhost:11434/api/chat");
        assert_eq!(client.model(), "llama2");
    }

    #[test]
    fn a_base_url_points_at_another_host() {
        let client = LocalClient::new(LlmConfig {
            provider: Provider::Local,
            base_url: Some("http://llm-box:11434/".into()),
            ..LlmConfig::default()
        });
        assert_eq!(client.endpoint(), "http://llm-box:11434/api/chat");
    }

    #[test]
    fn requests_disable_native_streaming() {
        let request = LocalRequest {
            model: "llama2".into(),
            messages: with_system("sys", &[ChatMessage::new(Role::User, "hi")]),
            stream: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][0]["role"], "system");
    }

    #[test]
    fn responses_decode_the_assistant_message() {
        let body: LocalResponse =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":"hey"},"done":true}"#)
                .unwrap();
        assert_eq!(body.message.content, "hey");
    }
}
