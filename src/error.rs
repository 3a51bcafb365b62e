use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Query execution error: {0}")]
    Query(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unauthorized caller: {0}")]
    Unauthorized(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Formatting error: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
