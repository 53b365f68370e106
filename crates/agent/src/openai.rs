//! Chat-completions client for OpenAI and every server that speaks the same
//! wire format (Ollama exposes it under `/v1`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::llm::{truncate, Completion, CompletionRequest, LlmClient, LlmError};

pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

pub struct OpenAiCompatibleClient {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: Option<&str>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { http, endpoint: chat_endpoint(base_url.unwrap_or(DEFAULT_OPENAI_BASE)), api_key })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// `https://host/v1` and `https://host` both resolve to the chat-completions
/// route; a full route is used as given.
pub fn chat_endpoint(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let payload = json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
        });

        let mut builder = self.http.post(&self.endpoint).json(&payload);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        let response =
            builder.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = truncate(&response.text().await.unwrap_or_default(), 320);
            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                LlmError::RateLimited { status: status.as_u16(), body }
            } else {
                LlmError::Http { status: status.as_u16(), body }
            });
        }

        let body: ChatResponse =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Decode("response did not include choices".to_string()))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }
}
