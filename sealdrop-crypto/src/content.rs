//! AES-128-CBC file content encryption.
//!
//! The IV is all zeros, which is what deployed clients use. Keys are fresh
//! per key exchange but reused across uploads, so identical plaintext
//! prefixes produce identical ciphertext prefixes.

use crate::error::CryptoError;
use crate::keys::SymmetricKey;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const BLOCK_SIZE: usize = 16;
const ZERO_IV: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

/// Decrypts uploaded content.
pub fn decrypt_content(key: &SymmetricKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidCiphertextLength(ciphertext.len()));
    }
    Aes128CbcDec::new(key.as_bytes().into(), &ZERO_IV.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::InvalidPadding)
}

/// Encrypts content the way clients do before uploading.
pub fn encrypt_content(key: &SymmetricKey, plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.as_bytes().into(), &ZERO_IV.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}
