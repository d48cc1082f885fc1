//! Error types for keepsake-sync

use thiserror::Error;

/// Result type alias using keepsake-sync's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in keepsake-sync operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local durable storage error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue item or cached record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store error surfaced through the engine
    #[error("Remote store error: {0}")]
    Remote(#[from] crate::remote::RemoteError),
}
