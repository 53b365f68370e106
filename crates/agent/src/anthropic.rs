use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{truncate, ChatMessage, ChatRole, Completion, CompletionRequest, LlmClient, LlmError};

pub const DEFAULT_ANTHROPIC_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

pub struct AnthropicClient {
    http: Client,
    endpoint: String,
    api_key: SecretString,
}

impl AnthropicClient {
    pub fn new(
        base_url: Option<&str>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { http, endpoint: messages_endpoint(base_url.unwrap_or(DEFAULT_ANTHROPIC_BASE)), api_key })
    }
}

pub fn messages_endpoint(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with("/messages") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/messages")
    } else {
        format!("{base}/v1/messages")
    }
}

/// Splits system text out of the conversation and merges consecutive turns
/// of the same role; the messages API rejects both.
fn messages_payload(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system = Vec::new();
    let mut turns: Vec<(ChatRole, String)> = Vec::new();

    for message in messages {
        if message.role == ChatRole::System {
            system.push(message.content.as_str());
            continue;
        }
        match turns.last_mut() {
            Some((role, content)) if *role == message.role => {
                content.push_str("\n\n");
                content.push_str(&message.content);
            }
            _ => turns.push((message.role, message.content.clone())),
        }
    }

    let turns = turns
        .into_iter()
        .map(|(role, content)| {
            let role = if role == ChatRole::Assistant { "assistant" } else { "user" };
            json!({ "role": role, "content": content })
        })
        .collect();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, turns)
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let (system, messages) = messages_payload(&request.messages);
        let mut payload = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if let Some(system) = system {
            payload["system"] = json!(system);
        }

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = truncate(&response.text().await.unwrap_or_default(), 320);
            // 529 is the provider's "overloaded" status.
            return Err(match status.as_u16() {
                429 | 529 => LlmError::RateLimited { status: status.as_u16(), body },
                code => LlmError::Http { status: code, body },
            });
        }

        let body: MessagesResponse =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        let content = body
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Completion { content, finish_reason: body.stop_reason })
    }
}
