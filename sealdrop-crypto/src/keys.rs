//! Symmetric session keys and their RSA-OAEP wrapping.

use crate::error::CryptoError;
use crate::{PUBLIC_KEY_SIZE, RSA_KEY_BITS, RSA_PUBLIC_EXPONENT, SYMMETRIC_KEY_SIZE};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-128 session key. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Generates a fresh key from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SYMMETRIC_KEY_SIZE] =
            slice.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: SYMMETRIC_KEY_SIZE,
                actual: slice.len(),
            })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Parses a client public key.
///
/// The wire carries X.509 SubjectPublicKeyInfo DER; bare PKCS#1 DER is
/// accepted too.
pub fn parse_public_key(public_key: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    if public_key.len() != PUBLIC_KEY_SIZE {
        return Err(CryptoError::InvalidPublicKeyLength {
            expected: PUBLIC_KEY_SIZE,
            actual: public_key.len(),
        });
    }
    RsaPublicKey::from_public_key_der(public_key)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(public_key))
        .map_err(|_| CryptoError::InvalidPublicKey)
}

/// Generates a new session key and encrypts it to `public_key`.
///
/// Returns the key (to be stored server side) and the wrapped bytes (to be
/// sent to the client).
pub fn generate_and_wrap_key(public_key: &[u8]) -> Result<(SymmetricKey, Vec<u8>), CryptoError> {
    let public_key = parse_public_key(public_key)?;
    let key = SymmetricKey::generate();
    let wrapped = public_key.encrypt(&mut OsRng, Oaep::new::<Sha1>(), key.as_bytes())?;
    Ok((key, wrapped))
}

/// Recovers a session key wrapped by [`generate_and_wrap_key`].
pub fn unwrap_key(key_pair: &ClientKeyPair, wrapped: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let mut raw = key_pair.private.decrypt(Oaep::new::<Sha1>(), wrapped)?;
    let key = SymmetricKey::from_slice(&raw);
    raw.zeroize();
    key
}

/// RSA key pair held by a client.
#[derive(Clone)]
pub struct ClientKeyPair {
    private: RsaPrivateKey,
}

impl ClientKeyPair {
    /// Generates a 1024-bit key with exponent 17, whose public half encodes
    /// to exactly [`PUBLIC_KEY_SIZE`] bytes.
    pub fn generate() -> Result<Self, CryptoError> {
        let exponent = BigUint::from(RSA_PUBLIC_EXPONENT);
        let private = RsaPrivateKey::new_with_exp(&mut OsRng, RSA_KEY_BITS, &exponent)?;
        Ok(Self { private })
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::from_pkcs8_der(der).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { private })
    }

    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>, CryptoError> {
        let document = self
            .private
            .to_pkcs8_der()
            .map_err(|_| CryptoError::KeyExport)?;
        Ok(document.as_bytes().to_vec())
    }

    /// Public key in wire form (SubjectPublicKeyInfo DER).
    pub fn public_key_bytes(&self) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError> {
        let document = self
            .private
            .to_public_key()
            .to_public_key_der()
            .map_err(|_| CryptoError::KeyExport)?;
        let der = document.as_bytes();
        der.try_into().map_err(|_| CryptoError::InvalidPublicKeyLength {
            expected: PUBLIC_KEY_SIZE,
            actual: der.len(),
        })
    }
}

impl fmt::Debug for ClientKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientKeyPair(..)")
    }
}
