//! Store-side error type

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Staging load error: {0}")]
    Staging(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Backup error: {0}")]
    Backup(String),
}

impl From<StoreError> for att_common::AttError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => att_common::AttError::Io(e),
            StoreError::Serialization(e) => att_common::AttError::Serialization(e),
            StoreError::Config(m) => att_common::AttError::Config(m),
            StoreError::Registry(m) => att_common::AttError::Registry(m),
            StoreError::Validation(m) => att_common::AttError::Validation(m),
            StoreError::Backup(m) => att_common::AttError::Backup(m),
            other => att_common::AttError::Database(other.to_string()),
        }
    }
}
