//! # sealdrop-crypto
//!
//! Cryptographic primitives used by the sealdrop protocol:
//! - Symmetric session keys, wrapped with RSA-OAEP (SHA-1) for the client
//! - AES-128-CBC content decryption (zero IV, PKCS#7)
//! - POSIX `cksum` over decrypted content

pub mod checksum;
pub mod content;
pub mod error;
pub mod keys;

pub use checksum::{checksum, Cksum};
pub use content::{decrypt_content, encrypt_content};
pub use error::CryptoError;
pub use keys::{generate_and_wrap_key, unwrap_key, ClientKeyPair, SymmetricKey};

pub use sealdrop_protocol::{PUBLIC_KEY_SIZE, SYMMETRIC_KEY_SIZE};

/// RSA modulus size used for client key pairs.
pub const RSA_KEY_BITS: usize = 1024;

/// RSA public exponent used for client key pairs.
pub const RSA_PUBLIC_EXPONENT: u32 = 17;
