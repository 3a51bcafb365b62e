//! Client for the classifier model (Anthropic messages API).

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TOKENS: u32 = 1000;

/// Narrow seam for the text-completion collaborator so the pipeline can be
/// driven with a scripted fake in tests.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn call_model(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": prompt}]
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("model API call failed: {}", e)))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("failed to read model response: {}", e)))?;

        if let Some(message) = payload["error"]["message"].as_str() {
            return Err(AssistantError::Llm(format!("model API error: {}", message)));
        }

        let content = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| AssistantError::Llm("no text content in model response".to_string()))?;

        if let Some(tokens) = payload["usage"]["input_tokens"].as_u64() {
            debug!(input_tokens = tokens, "model call accounted");
        }

        Ok(content.to_string())
    }
}

#[async_trait]
impl CompletionModel for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.call_model(prompt).await
    }
}
