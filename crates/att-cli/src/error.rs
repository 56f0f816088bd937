//! CLI error type

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Common(#[from] att_common::AttError),

    #[error(transparent)]
    Store(#[from] att_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation gate failed: {0}")]
    GateFailed(String),

    #[error("Pipeline stopped: {0}")]
    Pipeline(String),

    #[error("{0}")]
    Usage(String),
}
