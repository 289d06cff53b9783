use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No configuration found for alias '{alias}'. Available models: {available}")]
    UnknownAlias { alias: String, available: String },

    #[error("Missing required parameters: {0}")]
    MissingParam(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM API error: {0}")]
    LLMApi(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Prompt generation error: {0}")]
    PromptTemplate(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("{0} is designed for asynchronous use only; use the async call path")]
    AsyncOnly(String),

    #[error("{0} performs blocking I/O and cannot be used from the async call path")]
    BlockingInAsync(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_))
    }

    /// Configuration errors are raised before any request leaves the process.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::UnknownAlias { .. } | Error::MissingParam(_) | Error::Config(_)
        )
    }
}
