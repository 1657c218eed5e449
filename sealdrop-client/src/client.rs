//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use bytes::Bytes;
use sealdrop_crypto::{checksum, encrypt_content, unwrap_key, ClientKeyPair, SymmetricKey};
use sealdrop_protocol::{
    ChecksumOutcome, ChecksumReport, ClientId, FileUpload, PublicKeyExchange, Registration,
    Request, Response,
};
use std::sync::Arc;

/// Default number of uploads before giving up on a file.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Server acknowledgement of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReceipt {
    pub content_size: u32,
    pub file_name: String,
    /// cksum of the decrypted content, as computed by the server.
    pub checksum: u32,
}

/// Result of [`Client::send_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Uploads performed.
    pub attempts: u32,
    /// Whether a server checksum matched. When false the server has dropped
    /// the file.
    pub verified: bool,
}

/// High-level client for sealdrop.
pub struct Client {
    conn: Arc<Connection>,
    max_attempts: u32,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets how many uploads [`Client::send_file`] makes. At least one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Registers `username` and returns the assigned identifier.
    ///
    /// A rejected name usually shows up as [`ClientError::ConnectionClosed`];
    /// [`ClientError::RegistrationRejected`] only when the server is
    /// configured to reply.
    pub async fn register(&self, username: &str) -> Result<ClientId, ClientError> {
        let request = Registration::new(ClientId::nil(), username);
        match self.conn.request(&request.into()).await? {
            Response::RegistrationSuccess { client_id } => Ok(client_id),
            Response::RegistrationFail => Err(ClientError::RegistrationRejected),
            other => Err(unexpected("RegistrationSuccess", &other)),
        }
    }

    /// Sends the public key of `key_pair` and unwraps the session key the
    /// server returns.
    pub async fn exchange_keys(
        &self,
        client_id: ClientId,
        username: &str,
        key_pair: &ClientKeyPair,
    ) -> Result<SymmetricKey, ClientError> {
        let request = PublicKeyExchange::new(client_id, username, key_pair.public_key_bytes()?);
        match self.conn.request(&request.into()).await? {
            Response::KeyExchangeAck {
                client_id: acked,
                wrapped_key,
            } => {
                expect_id(client_id, acked)?;
                Ok(unwrap_key(key_pair, &wrapped_key)?)
            }
            other => Err(unexpected("KeyExchangeAck", &other)),
        }
    }

    /// Encrypts and uploads one file.
    pub async fn upload(
        &self,
        client_id: ClientId,
        key: &SymmetricKey,
        file_name: &str,
        content: &[u8],
    ) -> Result<FileReceipt, ClientError> {
        let ciphertext = encrypt_content(key, content);
        let request = FileUpload::new(client_id, file_name, Bytes::from(ciphertext));
        let response = self.conn.request(&request.into()).await?;
        receipt(client_id, response)
    }

    /// Reports the outcome of comparing a server checksum.
    pub async fn report_checksum(
        &self,
        client_id: ClientId,
        outcome: ChecksumOutcome,
        file_name: &str,
    ) -> Result<(), ClientError> {
        let request = ChecksumReport::new(client_id, outcome, file_name);
        match self.conn.request(&request.into()).await? {
            Response::ConfirmOnly => Ok(()),
            other => Err(unexpected("ConfirmOnly", &other)),
        }
    }

    /// Uploads a file until the server checksum matches or the attempt
    /// limit is reached.
    ///
    /// After a mismatch the client reports it and the upload is repeated in
    /// the same exchange. A final mismatch is reported as the retry limit,
    /// which makes the server drop the file.
    pub async fn send_file(
        &self,
        client_id: ClientId,
        key: &SymmetricKey,
        file_name: &str,
        content: &[u8],
    ) -> Result<Delivery, ClientError> {
        let expected = checksum(content);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let receipt = self.upload(client_id, key, file_name, content).await?;

            if receipt.checksum == expected {
                self.report_checksum(client_id, ChecksumOutcome::Valid, file_name)
                    .await?;
                tracing::info!("Sent {} after {} attempt(s)", file_name, attempts);
                return Ok(Delivery {
                    attempts,
                    verified: true,
                });
            }

            tracing::warn!(
                "Checksum mismatch for {} (local {}, server {}), attempt {}/{}",
                file_name,
                expected,
                receipt.checksum,
                attempts,
                self.max_attempts
            );
            if attempts >= self.max_attempts {
                self.report_checksum(client_id, ChecksumOutcome::RetryLimit, file_name)
                    .await?;
                return Ok(Delivery {
                    attempts,
                    verified: false,
                });
            }
            self.report_checksum(client_id, ChecksumOutcome::Invalid, file_name)
                .await?;
        }
    }

    /// Sends a raw request. For tests and tooling.
    pub async fn request(&self, request: &Request) -> Result<Response, ClientError> {
        self.conn.request(request).await
    }
}

fn receipt(client_id: ClientId, response: Response) -> Result<FileReceipt, ClientError> {
    match response {
        Response::FileReceived {
            client_id: acked,
            content_size,
            file_name,
            checksum,
        } => {
            expect_id(client_id, acked)?;
            Ok(FileReceipt {
                content_size,
                file_name,
                checksum,
            })
        }
        other => Err(unexpected("FileReceived", &other)),
    }
}

fn expect_id(expected: ClientId, actual: ClientId) -> Result<(), ClientError> {
    if expected != actual {
        return Err(ClientError::ClientIdMismatch { expected, actual });
    }
    Ok(())
}

fn unexpected(expected: &'static str, response: &Response) -> ClientError {
    ClientError::UnexpectedResponse {
        expected,
        actual: response.code(),
    }
}
