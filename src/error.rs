//! Error types for the evaluation harness.

use std::path::PathBuf;
use thiserror::Error;

use crate::schema::ValidationError;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors that can occur while running an evaluation.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file error or missing key.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A model block names a provider we cannot dispatch to.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// A required model block is absent from the config file.
    #[error("Missing model block '{0}' in configuration")]
    MissingBlock(String),

    /// Connection or timeout failure talking to a backend.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with an error status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// LLM API error.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// LLM response parsing error.
    #[error("Failed to parse LLM response: {0}")]
    LlmParse(String),

    /// Model output failed schema validation.
    #[error("Schema validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// An optional scorer could not be constructed.
    #[error("Scorer '{name}' unavailable: {reason}")]
    ScorerUnavailable { name: &'static str, reason: String },

    /// Prompt template could not be loaded or rendered.
    #[error("Template error: {0}")]
    Template(String),

    /// Dataset content is unusable.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// CSV read/write error.
    #[error("CSV error: {0}")]
    Csv(String),
}

impl EvalError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this failure is worth another attempt (connection or timeout).
    pub fn is_transient(&self) -> bool {
        matches!(self, EvalError::Transport(_))
    }

    /// Whether this is a configuration problem that should abort the run.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            EvalError::Config(_) | EvalError::UnknownProvider(_) | EvalError::MissingBlock(_)
        )
    }
}

impl From<reqwest::Error> for EvalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            return EvalError::Transport(err.to_string());
        }
        if let Some(status) = err.status() {
            return EvalError::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        EvalError::LlmApi(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::LlmParse(err.to_string())
    }
}

impl From<csv::Error> for EvalError {
    fn from(err: csv::Error) -> Self {
        EvalError::Csv(err.to_string())
    }
}
