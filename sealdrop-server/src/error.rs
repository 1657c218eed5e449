//! Server error types.

use sealdrop_protocol::{ClientId, RequestCode};
use thiserror::Error;

/// Coarse error classes, used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Decode,
    Crypto,
    Storage,
    Validation,
    Protocol,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::Decode => "decode",
            ErrorKind::Crypto => "crypto",
            ErrorKind::Storage => "storage",
            ErrorKind::Validation => "validation",
            ErrorKind::Protocol => "protocol",
        }
    }
}

/// Server errors. Any of these ends the session that raised it.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] sealdrop_protocol::ProtocolError),

    #[error("crypto error: {0}")]
    Crypto(#[from] sealdrop_crypto::CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] sealdrop_storage::StorageError),

    #[error("invalid username: {0:?}")]
    InvalidUsername(String),

    #[error("username already registered: {0}")]
    DuplicateUsername(String),

    #[error("unknown client: {0}")]
    UnknownClient(ClientId),

    #[error("unknown username: {0}")]
    UnknownUsername(String),

    #[error("client {claimed} does not own username {name}")]
    ClientMismatch { name: String, claimed: ClientId },

    #[error("client {0} has no symmetric key; key exchange required")]
    MissingSymmetricKey(ClientId),

    #[error("no file {file_name:?} for client {client_id}")]
    FileNotFound {
        client_id: ClientId,
        file_name: String,
    },

    #[error("expected {expected}, got {actual}")]
    UnexpectedRequest {
        expected: &'static str,
        actual: RequestCode,
    },

    #[error("connection closed while {0}")]
    ConnectionClosed(&'static str),

    #[error("idle timeout")]
    IdleTimeout,

    #[error("server shutting down")]
    ShuttingDown,

    #[error("blocking task failed: {0}")]
    BlockingTask(#[from] tokio::task::JoinError),
}

impl ServerError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Io(_)
            | ServerError::ConnectionClosed(_)
            | ServerError::IdleTimeout
            | ServerError::ShuttingDown
            | ServerError::BlockingTask(_) => ErrorKind::Io,
            ServerError::Decode(_) => ErrorKind::Decode,
            ServerError::Crypto(_) => ErrorKind::Crypto,
            ServerError::Storage(_) => ErrorKind::Storage,
            ServerError::InvalidUsername(_)
            | ServerError::DuplicateUsername(_)
            | ServerError::UnknownClient(_)
            | ServerError::UnknownUsername(_)
            | ServerError::ClientMismatch { .. }
            | ServerError::MissingSymmetricKey(_)
            | ServerError::FileNotFound { .. } => ErrorKind::Validation,
            ServerError::UnexpectedRequest { .. } => ErrorKind::Protocol,
        }
    }
}
