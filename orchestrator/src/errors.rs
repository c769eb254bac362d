//! Error types for the orchestrator

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("A compilation is already being created")]
    CreationInFlight,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deployment target is incomplete: missing {0}")]
    IncompleteTarget(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Upload error: {0}")]
    UploadError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// HTTP status code of a failed service call, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            OrchestratorError::HttpStatus { status, .. } => Some(*status),
            OrchestratorError::HttpError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
