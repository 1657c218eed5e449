//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding wire data.
///
/// Decoding is all-or-nothing: whenever one of these is returned, no
/// partially decoded message has been handed to the caller.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated input: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unknown request code: {0}")]
    UnknownRequestCode(u16),

    #[error("unknown response code: {0}")]
    UnknownResponseCode(u16),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u32, max: u32 },

    #[error("payload too small: {size} bytes (min {min})")]
    PayloadTooSmall { size: u32, min: u32 },

    #[error("content length mismatch: declared {declared}, payload carries {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("unexpected payload size for response {code}: expected {expected}, got {actual}")]
    UnexpectedPayloadSize {
        code: u16,
        expected: u32,
        actual: u32,
    },

    #[error("invalid UTF-8 in field '{0}'")]
    InvalidUtf8(&'static str),
}
