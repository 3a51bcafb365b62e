//! Analysis collaborator for oversized results and chart/file requests.
//!
//! The result table is shipped as a CSV file to the model's code-execution
//! sandbox, which answers the question against it. The collaborator's
//! output is treated as opaque text; uploaded files are deleted afterwards
//! on a best-effort basis.

use crate::error::{AssistantError, Result};
use crate::warehouse::QueryResult;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const BETA_FEATURES: &str = "code-execution-2025-08-25,files-api-2025-04-14";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_TOKENS: u32 = 4096;

#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Answer `question` against `table`, typically by running code over it.
    async fn analyze(&self, question: &str, table: &QueryResult) -> Result<String>;
}

pub struct CodeExecutionClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl CodeExecutionClient {
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

    async fn upload_csv(&self, csv: String) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(csv.into_bytes())
            .file_name("data.csv")
            .mime_str("text/csv")
            .map_err(|e| AssistantError::Format(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/v1/files", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", BETA_FEATURES)
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("file upload failed: {}", e)))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("file upload returned no JSON: {}", e)))?;

        payload["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AssistantError::Llm("file upload returned no id".to_string()))
    }

    async fn delete_file(&self, file_id: &str) {
        let result = self
            .client
            .delete(format!("{}/v1/files/{}", self.base_url, file_id))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", BETA_FEATURES)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;
        if let Err(e) = result {
            warn!(%file_id, error = %e, "could not delete uploaded file");
        }
    }

    async fn run_analysis(&self, question: &str, file_id: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": format!("Using the info in the file provided: {}", question)},
                    {"type": "container_upload", "file_id": file_id}
                ]
            }],
            "tools": [{"type": "code_execution_20250825", "name": "code_execution"}]
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", BETA_FEATURES)
            .header("content-type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("analysis call failed: {}", e)))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("analysis returned no JSON: {}", e)))?;

        if let Some(message) = payload["error"]["message"].as_str() {
            return Err(AssistantError::Llm(format!("analysis API error: {}", message)));
        }

        // The sandbox interleaves tool blocks with text; the last text
        // block carries the final answer.
        let answer = payload["content"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|block| block["type"] == "text")
            .filter_map(|block| block["text"].as_str())
            .last()
            .unwrap_or("")
            .trim()
            .to_string();

        if answer.is_empty() {
            return Err(AssistantError::Llm("analysis produced no text".to_string()));
        }
        Ok(answer)
    }
}

#[async_trait]
impl AnalysisService for CodeExecutionClient {
    async fn analyze(&self, question: &str, table: &QueryResult) -> Result<String> {
        if table.is_empty() {
            return Ok("No data available.".to_string());
        }

        let csv = table.to_csv()?;
        let file_id = self.upload_csv(csv).await?;
        debug!(%file_id, rows = table.row_count(), "result table uploaded");

        let outcome = self.run_analysis(question, &file_id).await;
        self.delete_file(&file_id).await;
        outcome
    }
}
