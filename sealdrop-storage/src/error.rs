//! Storage error types.

use sealdrop_protocol::ClientId;
use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("client name already registered: {0}")]
    DuplicateName(String),

    #[error("client id already registered: {0}")]
    DuplicateId(ClientId),

    #[error("client not found: {0}")]
    ClientNotFound(ClientId),

    #[error("file not found: {client_id}/{file_name}")]
    FileNotFound { client_id: ClientId, file_name: String },

    #[error("invalid path component: {0:?}")]
    InvalidPathComponent(String),

    #[error("data corruption: {0}")]
    Corruption(String),
}

impl StorageError {
    /// Returns true for errors raised because a row was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ClientNotFound(_) | StorageError::FileNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
