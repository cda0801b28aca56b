//! Error types for the ingestion pipeline
//!
//! Every variant is fatal to the current run. Join mismatches and duplicate
//! writes are not errors; see [`crate::transform::JoinWarning`] and
//! [`crate::identity::SaveOutcome`].

use costflow_common::CommonError;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Billing API call failed
    #[error("Failed to fetch {key}: {message}")]
    Fetch { key: String, message: String },

    /// Object storage read, write or delete failed
    #[error("Object storage error at {key}: {message}")]
    Storage { key: String, message: String },

    /// Malformed amount or date in a line item
    #[error("Parse error: {0}")]
    Parse(String),

    /// Malformed snapshot or record JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Output name with no registered writer
    #[error("Configuration error: unknown destination '{0}'")]
    UnknownDestination(String),

    /// A writer failed; remaining destinations were not attempted
    #[error("Destination '{name}' failed: {source}")]
    Destination {
        name: String,
        #[source]
        source: Box<IngestError>,
    },

    /// Relational sink failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Warehouse sink failure
    #[error("Warehouse error: {0}")]
    Warehouse(String),

    /// Monitoring sink failure
    #[error("Monitoring error: {0}")]
    Monitoring(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl IngestError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn warehouse(msg: impl Into<String>) -> Self {
        Self::Warehouse(msg.into())
    }

    pub fn monitoring(msg: impl Into<String>) -> Self {
        Self::Monitoring(msg.into())
    }

    /// Name of the failing destination, if this error came out of a writer
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::Destination { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::UnknownDestination(_))
    }
}
