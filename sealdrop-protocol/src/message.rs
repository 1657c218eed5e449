//! Typed requests and responses.

use crate::error::ProtocolError;
use crate::frame::{
    ensure_len, get_fixed_str, put_fixed_str, ClientId, RequestCode, RequestHeader, ResponseCode,
    ResponseHeader,
};
use crate::{
    PublicKeyBytes, CHECKSUM_SIZE, CLIENT_ID_SIZE, FILE_NAME_SIZE, PUBLIC_KEY_SIZE, USERNAME_SIZE,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Fixed part of a file upload body: client id, content size, file name.
pub const FILE_UPLOAD_PREFIX_SIZE: usize = CLIENT_ID_SIZE + 4 + FILE_NAME_SIZE;

/// Payload size of a FileReceived response.
pub const FILE_RECEIVED_PAYLOAD_SIZE: usize =
    CLIENT_ID_SIZE + 4 + FILE_NAME_SIZE + CHECKSUM_SIZE;

/// Registration request (1100).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub header: RequestHeader,
    pub username: String,
}

impl Registration {
    pub fn new(client_id: ClientId, username: impl Into<String>) -> Self {
        Self {
            header: RequestHeader::new(client_id, RequestCode::Registration, USERNAME_SIZE as u32),
            username: username.into(),
        }
    }
}

/// Public key exchange request (1101).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyExchange {
    pub header: RequestHeader,
    pub username: String,
    pub public_key: PublicKeyBytes,
}

impl PublicKeyExchange {
    pub fn new(client_id: ClientId, username: impl Into<String>, public_key: PublicKeyBytes) -> Self {
        Self {
            header: RequestHeader::new(
                client_id,
                RequestCode::PublicKeyExchange,
                (USERNAME_SIZE + PUBLIC_KEY_SIZE) as u32,
            ),
            username: username.into(),
            public_key,
        }
    }
}

/// File upload request (1103). `content` is the encrypted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub header: RequestHeader,
    pub client_id: ClientId,
    pub content_size: u32,
    pub file_name: String,
    pub content: Bytes,
}

impl FileUpload {
    pub fn new(client_id: ClientId, file_name: impl Into<String>, content: Bytes) -> Self {
        let content_size = content.len() as u32;
        Self {
            header: RequestHeader::new(
                client_id,
                RequestCode::FileUpload,
                FILE_UPLOAD_PREFIX_SIZE as u32 + content_size,
            ),
            client_id,
            content_size,
            file_name: file_name.into(),
            content,
        }
    }
}

/// What the client concluded after comparing checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumOutcome {
    Valid,
    Invalid,
    RetryLimit,
}

impl ChecksumOutcome {
    pub fn code(self) -> RequestCode {
        match self {
            ChecksumOutcome::Valid => RequestCode::ChecksumValid,
            ChecksumOutcome::Invalid => RequestCode::ChecksumInvalid,
            ChecksumOutcome::RetryLimit => RequestCode::ChecksumInvalidRetryLimit,
        }
    }
}

/// Checksum outcome request (1104, 1105, 1106).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    pub header: RequestHeader,
    pub outcome: ChecksumOutcome,
    pub client_id: ClientId,
    pub file_name: String,
}

impl ChecksumReport {
    pub fn new(client_id: ClientId, outcome: ChecksumOutcome, file_name: impl Into<String>) -> Self {
        Self {
            header: RequestHeader::new(
                client_id,
                outcome.code(),
                (CLIENT_ID_SIZE + FILE_NAME_SIZE) as u32,
            ),
            outcome,
            client_id,
            file_name: file_name.into(),
        }
    }
}

/// A fully decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Registration(Registration),
    PublicKeyExchange(PublicKeyExchange),
    FileUpload(FileUpload),
    Checksum(ChecksumReport),
}

impl Request {
    pub fn header(&self) -> &RequestHeader {
        match self {
            Request::Registration(r) => &r.header,
            Request::PublicKeyExchange(r) => &r.header,
            Request::FileUpload(r) => &r.header,
            Request::Checksum(r) => &r.header,
        }
    }

    pub fn code(&self) -> RequestCode {
        self.header().code
    }

    /// Encodes header and body.
    pub fn encode(&self, buf: &mut BytesMut) {
        self.header().encode(buf);
        match self {
            Request::Registration(r) => {
                put_fixed_str(buf, &r.username, USERNAME_SIZE);
            }
            Request::PublicKeyExchange(r) => {
                put_fixed_str(buf, &r.username, USERNAME_SIZE);
                buf.put_slice(&r.public_key);
            }
            Request::FileUpload(r) => {
                buf.put_slice(r.client_id.as_bytes());
                buf.put_u32_le(r.content_size);
                put_fixed_str(buf, &r.file_name, FILE_NAME_SIZE);
                buf.put_slice(&r.content);
            }
            Request::Checksum(r) => {
                buf.put_slice(r.client_id.as_bytes());
                put_fixed_str(buf, &r.file_name, FILE_NAME_SIZE);
            }
        }
    }

    /// Decodes the body that follows `header`.
    ///
    /// `body` must be exactly the framed body: the code-implied length for
    /// fixed requests, `payload_size` bytes for file uploads.
    pub fn decode_body(header: RequestHeader, body: Bytes) -> Result<Self, ProtocolError> {
        let mut src = &body[..];
        let request = match header.code {
            RequestCode::Registration => {
                let username = get_fixed_str(&mut src, USERNAME_SIZE, "username")?;
                Request::Registration(Registration { header, username })
            }
            RequestCode::PublicKeyExchange => {
                let username = get_fixed_str(&mut src, USERNAME_SIZE, "username")?;
                ensure_len(src, PUBLIC_KEY_SIZE)?;
                let mut public_key = [0u8; PUBLIC_KEY_SIZE];
                src.copy_to_slice(&mut public_key);
                Request::PublicKeyExchange(PublicKeyExchange {
                    header,
                    username,
                    public_key,
                })
            }
            RequestCode::FileUpload => {
                if body.len() < FILE_UPLOAD_PREFIX_SIZE {
                    return Err(ProtocolError::PayloadTooSmall {
                        size: body.len() as u32,
                        min: FILE_UPLOAD_PREFIX_SIZE as u32,
                    });
                }
                let client_id = ClientId::read(&mut src);
                let content_size = src.get_u32_le();
                let file_name = get_fixed_str(&mut src, FILE_NAME_SIZE, "file_name")?;
                if content_size as usize != src.len() {
                    return Err(ProtocolError::LengthMismatch {
                        declared: content_size,
                        actual: src.len(),
                    });
                }
                Request::FileUpload(FileUpload {
                    header,
                    client_id,
                    content_size,
                    file_name,
                    content: body.slice(FILE_UPLOAD_PREFIX_SIZE..),
                })
            }
            code @ (RequestCode::ChecksumValid
            | RequestCode::ChecksumInvalid
            | RequestCode::ChecksumInvalidRetryLimit) => {
                ensure_len(src, CLIENT_ID_SIZE + FILE_NAME_SIZE)?;
                let client_id = ClientId::read(&mut src);
                let file_name = get_fixed_str(&mut src, FILE_NAME_SIZE, "file_name")?;
                let outcome = match code {
                    RequestCode::ChecksumValid => ChecksumOutcome::Valid,
                    RequestCode::ChecksumInvalid => ChecksumOutcome::Invalid,
                    _ => ChecksumOutcome::RetryLimit,
                };
                Request::Checksum(ChecksumReport {
                    header,
                    outcome,
                    client_id,
                    file_name,
                })
            }
        };
        Ok(request)
    }
}

impl From<Registration> for Request {
    fn from(r: Registration) -> Self {
        Request::Registration(r)
    }
}

impl From<PublicKeyExchange> for Request {
    fn from(r: PublicKeyExchange) -> Self {
        Request::PublicKeyExchange(r)
    }
}

impl From<FileUpload> for Request {
    fn from(r: FileUpload) -> Self {
        Request::FileUpload(r)
    }
}

impl From<ChecksumReport> for Request {
    fn from(r: ChecksumReport) -> Self {
        Request::Checksum(r)
    }
}

/// A server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    RegistrationSuccess {
        client_id: ClientId,
    },
    RegistrationFail,
    KeyExchangeAck {
        client_id: ClientId,
        wrapped_key: Bytes,
    },
    FileReceived {
        client_id: ClientId,
        content_size: u32,
        file_name: String,
        checksum: u32,
    },
    ConfirmOnly,
}

impl Response {
    pub fn code(&self) -> ResponseCode {
        match self {
            Response::RegistrationSuccess { .. } => ResponseCode::RegistrationSuccess,
            Response::RegistrationFail => ResponseCode::RegistrationFail,
            Response::KeyExchangeAck { .. } => ResponseCode::KeyExchangeAck,
            Response::FileReceived { .. } => ResponseCode::FileReceived,
            Response::ConfirmOnly => ResponseCode::ConfirmOnly,
        }
    }

    pub fn payload_size(&self) -> u32 {
        let size = match self {
            Response::RegistrationSuccess { .. } => CLIENT_ID_SIZE,
            Response::RegistrationFail | Response::ConfirmOnly => 0,
            Response::KeyExchangeAck { wrapped_key, .. } => CLIENT_ID_SIZE + wrapped_key.len(),
            Response::FileReceived { .. } => FILE_RECEIVED_PAYLOAD_SIZE,
        };
        size as u32
    }

    pub fn header(&self) -> ResponseHeader {
        ResponseHeader::new(self.code(), self.payload_size())
    }

    /// Encodes the payload only, without the header.
    pub fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Response::RegistrationSuccess { client_id } => {
                buf.put_slice(client_id.as_bytes());
            }
            Response::RegistrationFail | Response::ConfirmOnly => {}
            Response::KeyExchangeAck {
                client_id,
                wrapped_key,
            } => {
                buf.put_slice(client_id.as_bytes());
                buf.put_slice(wrapped_key);
            }
            Response::FileReceived {
                client_id,
                content_size,
                file_name,
                checksum,
            } => {
                buf.put_slice(client_id.as_bytes());
                buf.put_u32_le(*content_size);
                put_fixed_str(buf, file_name, FILE_NAME_SIZE);
                buf.put_u32_le(*checksum);
            }
        }
    }

    /// Encodes header followed by payload.
    pub fn encode(&self, buf: &mut BytesMut) {
        self.header().encode(buf);
        self.encode_payload(buf);
    }

    /// Decodes a response payload given its already-decoded header.
    pub fn decode(header: &ResponseHeader, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != header.payload_size as usize {
            return Err(ProtocolError::LengthMismatch {
                declared: header.payload_size,
                actual: payload.len(),
            });
        }
        let mut src = payload;
        let response = match header.code {
            ResponseCode::RegistrationSuccess => {
                expect_size(header, CLIENT_ID_SIZE)?;
                Response::RegistrationSuccess {
                    client_id: ClientId::read(&mut src),
                }
            }
            ResponseCode::RegistrationFail => {
                expect_size(header, 0)?;
                Response::RegistrationFail
            }
            ResponseCode::KeyExchangeAck => {
                if payload.len() < CLIENT_ID_SIZE {
                    return Err(ProtocolError::PayloadTooSmall {
                        size: header.payload_size,
                        min: CLIENT_ID_SIZE as u32,
                    });
                }
                let client_id = ClientId::read(&mut src);
                Response::KeyExchangeAck {
                    client_id,
                    wrapped_key: Bytes::copy_from_slice(src),
                }
            }
            ResponseCode::FileReceived => {
                expect_size(header, FILE_RECEIVED_PAYLOAD_SIZE)?;
                let client_id = ClientId::read(&mut src);
                let content_size = src.get_u32_le();
                let file_name = get_fixed_str(&mut src, FILE_NAME_SIZE, "file_name")?;
                let checksum = src.get_u32_le();
                Response::FileReceived {
                    client_id,
                    content_size,
                    file_name,
                    checksum,
                }
            }
            ResponseCode::ConfirmOnly => {
                expect_size(header, 0)?;
                Response::ConfirmOnly
            }
        };
        Ok(response)
    }
}

fn expect_size(header: &ResponseHeader, expected: usize) -> Result<(), ProtocolError> {
    if header.payload_size as usize != expected {
        return Err(ProtocolError::UnexpectedPayloadSize {
            code: header.code.as_u16(),
            expected: expected as u32,
            actual: header.payload_size,
        });
    }
    Ok(())
}
