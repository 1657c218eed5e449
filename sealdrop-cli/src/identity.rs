//! Identity file: who this client is registered as.
//!
//! Three lines: display name, hex client id, base64 PKCS#8 private key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sealdrop_crypto::{ClientKeyPair, CryptoError};
use sealdrop_protocol::ClientId;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default identity file name.
pub const DEFAULT_IDENTITY_FILE: &str = "me.info";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("malformed identity file: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A registered client.
#[derive(Debug)]
pub struct Identity {
    pub name: String,
    pub client_id: ClientId,
    pub key_pair: ClientKeyPair,
}

impl Identity {
    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| IdentityError::Read(path.to_path_buf(), e))?;
        Self::parse(&content)
    }

    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        let content = self.render()?;
        std::fs::write(path, content).map_err(|e| IdentityError::Write(path.to_path_buf(), e))
    }

    fn parse(content: &str) -> Result<Self, IdentityError> {
        let mut lines = content.lines().map(str::trim_end);

        let name = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or(IdentityError::Malformed("missing name"))?
            .to_string();
        let client_id = lines
            .next()
            .and_then(ClientId::from_hex)
            .ok_or(IdentityError::Malformed("missing or invalid client id"))?;
        let key = lines
            .next()
            .ok_or(IdentityError::Malformed("missing private key"))?;
        let der = STANDARD
            .decode(key)
            .map_err(|_| IdentityError::Malformed("private key is not base64"))?;

        Ok(Self {
            name,
            client_id,
            key_pair: ClientKeyPair::from_pkcs8_der(&der)?,
        })
    }

    fn render(&self) -> Result<String, IdentityError> {
        let der = self.key_pair.to_pkcs8_der()?;
        Ok(format!(
            "{}\n{}\n{}\n",
            self.name,
            self.client_id.to_hex(),
            STANDARD.encode(der)
        ))
    }
}
