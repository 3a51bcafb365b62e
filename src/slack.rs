//! Slack Web API transport: post into threads, update messages in place,
//! and read back thread history as classification context.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const THREAD_HISTORY_LIMIT: usize = 20;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Post a message, optionally into a thread. Returns the message's
    /// timestamp id so it can be updated later.
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<String>;

    /// Replace the text of a previously sent message.
    async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<()>;

    /// Prior messages of a thread formatted as `[timestamp] text` lines,
    /// oldest first.
    async fn thread_history(&self, channel: &str, thread_ts: &str) -> Result<String>;
}

pub struct SlackClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl SlackClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: "https://slack.com/api".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn call_api(&self, method: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Transport(format!("{} failed: {}", method, e)))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Transport(format!("{} returned no JSON: {}", method, e)))?;

        if !payload["ok"].as_bool().unwrap_or(false) {
            let reason = payload["error"].as_str().unwrap_or("unknown_error");
            return Err(AssistantError::Transport(format!("{}: {}", method, reason)));
        }

        Ok(payload)
    }
}

#[async_trait]
impl Transport for SlackClient {
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<String> {
        let mut body = serde_json::json!({
            "channel": channel,
            "text": text,
        });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = Value::String(ts.to_string());
        }

        let payload = self.call_api("chat.postMessage", body).await?;
        let ts = payload["ts"]
            .as_str()
            .ok_or_else(|| AssistantError::Transport("chat.postMessage: missing ts".to_string()))?
            .to_string();
        info!(%channel, %ts, "message sent");
        Ok(ts)
    }

    async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<()> {
        self.call_api(
            "chat.update",
            serde_json::json!({
                "channel": channel,
                "ts": ts,
                "text": text,
            }),
        )
        .await?;
        info!(%channel, %ts, "message updated");
        Ok(())
    }

    async fn thread_history(&self, channel: &str, thread_ts: &str) -> Result<String> {
        let payload = self
            .call_api(
                "conversations.replies",
                serde_json::json!({
                    "channel": channel,
                    "ts": thread_ts,
                    "limit": THREAD_HISTORY_LIMIT,
                }),
            )
            .await?;

        let messages = match payload["messages"].as_array() {
            Some(messages) => messages,
            None => {
                warn!(%channel, "conversations.replies returned no messages");
                return Ok(String::new());
            }
        };

        let formatted: Vec<String> = messages
            .iter()
            .map(|message| {
                let ts = message["ts"].as_str().unwrap_or("");
                let text = message["text"].as_str().unwrap_or("");
                format!("    [{}] {}", readable_ts(ts), text)
            })
            .collect();

        Ok(formatted.join("\n"))
    }
}

/// Render a Slack timestamp ("1712345678.000200") as a human-readable
/// datetime, falling back to the raw value.
fn readable_ts(ts: &str) -> String {
    ts.split('.')
        .next()
        .and_then(|seconds| seconds.parse::<i64>().ok())
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}
