//! Error types shared by Costflow crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid period label: {0}")]
    InvalidPeriod(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Canonical form requires a JSON object, got {0}")]
    NotAnObject(String),
}
