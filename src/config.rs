//! Process configuration, read once at startup from the environment.

use crate::error::{AssistantError, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub slack_bot_token: String,
    pub anthropic_api_key: String,
    /// Model for the classification and synthesis stages.
    pub classifier_model: String,
    /// Model for the code-execution analysis collaborator.
    pub analysis_model: String,
    pub database_url: String,
    pub table_config_path: PathBuf,
    /// Caller allow-list; everyone else gets the maintenance reply.
    pub authorized_users: Vec<String>,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            slack_bot_token: require("SLACK_BOT_TOKEN")?,
            anthropic_api_key: require("ANTHROPIC_API_KEY")?,
            classifier_model: env_or("CLASSIFIER_MODEL", "claude-haiku-4-5-20251001"),
            analysis_model: env_or("ANALYSIS_MODEL", "claude-sonnet-4-20250514"),
            database_url: require("DATABASE_URL")?,
            table_config_path: PathBuf::from(env_or("TABLE_CONFIG", "metadata/table_config.json")),
            authorized_users: env_or("AUTHORIZED_USERS", "")
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect(),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
        })
    }
}

fn require(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AssistantError::Config(format!("{} is not set", key)))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
