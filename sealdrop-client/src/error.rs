//! Client error types.

use sealdrop_protocol::ResponseCode;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] sealdrop_protocol::ProtocolError),

    #[error("crypto error: {0}")]
    Crypto(#[from] sealdrop_crypto::CryptoError),

    #[error("not connected")]
    NotConnected,

    /// The server closed the connection. It does this instead of replying
    /// to most rejected requests.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("registration rejected")]
    RegistrationRejected,

    #[error("expected {expected} response, got {actual:?}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: ResponseCode,
    },

    #[error("response for client {actual}, expected {expected}")]
    ClientIdMismatch {
        expected: sealdrop_protocol::ClientId,
        actual: sealdrop_protocol::ClientId,
    },
}

impl ClientError {
    /// Returns whether reconnecting and repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}
