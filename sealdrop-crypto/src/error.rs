//! Crypto error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("public key must be {expected} bytes, got {actual}")]
    InvalidPublicKeyLength { expected: usize, actual: usize },

    #[error("public key could not be parsed")]
    InvalidPublicKey,

    #[error("private key could not be parsed")]
    InvalidPrivateKey,

    #[error("symmetric key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("key export failed")]
    KeyExport,

    #[error("ciphertext length {0} is not a positive multiple of the block size")]
    InvalidCiphertextLength(usize),

    #[error("invalid padding")]
    InvalidPadding,
}
