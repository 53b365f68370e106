use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use matchline_core::config::{LlmConfig, LlmProvider};

use crate::anthropic::AnthropicClient;
use crate::llm::LlmClient;
use crate::openai::OpenAiCompatibleClient;

/// Picks the wire client for the configured provider.
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let base_url = config.base_url.as_deref();

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            Arc::new(OpenAiCompatibleClient::new(base_url, config.api_key.clone(), timeout)?)
        }
        LlmProvider::Anthropic => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| anyhow!("anthropic provider requires an api key"))?;
            Arc::new(AnthropicClient::new(base_url, api_key, timeout)?)
        }
    };

    tracing::debug!(
        event_name = "llm.client.built",
        provider = config.provider.as_str(),
        model = %config.model,
        "model client ready"
    );
    Ok(client)
}
