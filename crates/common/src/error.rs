use thiserror::Error;

/// Top-level error type for LogRelay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{0}")]
    Internal(String),
}

/// Result type alias for LogRelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
