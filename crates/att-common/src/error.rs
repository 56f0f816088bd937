//! Error types for the trade pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AttError>;

/// Main error type for the trade pipeline
#[derive(Error, Debug)]
pub enum AttError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Species registry error: {0}")]
    Registry(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Unsupported archive format version: {0}")]
    FormatVersion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<csv::Error> for AttError {
    fn from(err: csv::Error) -> Self {
        AttError::Csv(err.to_string())
    }
}
