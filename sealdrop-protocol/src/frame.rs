//! Fixed headers and field primitives.
//!
//! Request header (23 bytes):
//!
//! ```text
//! +-----------+---------+---------+--------------+
//! | client_id | version | code    | payload_size |
//! | 16 bytes  | 1 byte  | 2 bytes |   4 bytes    |
//! +-----------+---------+---------+--------------+
//! ```
//!
//! Response header (7 bytes):
//!
//! ```text
//! +---------+---------+--------------+
//! | version | code    | payload_size |
//! | 1 byte  | 2 bytes |   4 bytes    |
//! +---------+---------+--------------+
//! ```
//!
//! All integers are little-endian.

use crate::error::ProtocolError;
use crate::{CLIENT_ID_SIZE, FILE_NAME_SIZE, PUBLIC_KEY_SIZE, USERNAME_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// Size of the request header in bytes (16+1+2+4 = 23).
pub const REQUEST_HEADER_SIZE: usize = CLIENT_ID_SIZE + 7;

/// Size of the response header in bytes (1+2+4 = 7).
pub const RESPONSE_HEADER_SIZE: usize = 7;

/// Opaque 16-byte client identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId([u8; CLIENT_ID_SIZE]);

impl ClientId {
    pub const fn from_bytes(bytes: [u8; CLIENT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// All-zero identifier, sent by clients that are not registered yet.
    pub const fn nil() -> Self {
        Self([0; CLIENT_ID_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; CLIENT_ID_SIZE] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0; CLIENT_ID_SIZE]
    }

    /// Parses a 32-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; CLIENT_ID_SIZE];
        hex::decode_to_slice(s.trim(), &mut bytes).ok()?;
        Some(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub(crate) fn read(src: &mut &[u8]) -> Self {
        let mut bytes = [0u8; CLIENT_ID_SIZE];
        src.copy_to_slice(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.to_hex())
    }
}

impl From<[u8; CLIENT_ID_SIZE]> for ClientId {
    fn from(bytes: [u8; CLIENT_ID_SIZE]) -> Self {
        Self(bytes)
    }
}

/// Request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestCode {
    Registration = 1100,
    PublicKeyExchange = 1101,
    FileUpload = 1103,
    ChecksumValid = 1104,
    ChecksumInvalid = 1105,
    ChecksumInvalidRetryLimit = 1106,
}

impl RequestCode {
    pub const ALL: [RequestCode; 6] = [
        RequestCode::Registration,
        RequestCode::PublicKeyExchange,
        RequestCode::FileUpload,
        RequestCode::ChecksumValid,
        RequestCode::ChecksumInvalid,
        RequestCode::ChecksumInvalidRetryLimit,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Body length implied by the code, or `None` when the header's
    /// payload size decides (file uploads).
    pub fn body_len(self) -> Option<usize> {
        match self {
            RequestCode::Registration => Some(USERNAME_SIZE),
            RequestCode::PublicKeyExchange => Some(USERNAME_SIZE + PUBLIC_KEY_SIZE),
            RequestCode::FileUpload => None,
            RequestCode::ChecksumValid
            | RequestCode::ChecksumInvalid
            | RequestCode::ChecksumInvalidRetryLimit => Some(CLIENT_ID_SIZE + FILE_NAME_SIZE),
        }
    }

    /// Stable name for logs and metric labels.
    pub fn name(self) -> &'static str {
        match self {
            RequestCode::Registration => "REGISTRATION",
            RequestCode::PublicKeyExchange => "PUBLIC_KEY_EXCHANGE",
            RequestCode::FileUpload => "FILE_UPLOAD",
            RequestCode::ChecksumValid => "CHECKSUM_VALID",
            RequestCode::ChecksumInvalid => "CHECKSUM_INVALID",
            RequestCode::ChecksumInvalidRetryLimit => "CHECKSUM_INVALID_RETRY_LIMIT",
        }
    }
}

impl TryFrom<u16> for RequestCode {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        RequestCode::ALL
            .into_iter()
            .find(|code| code.as_u16() == value)
            .ok_or(ProtocolError::UnknownRequestCode(value))
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u16())
    }
}

/// Response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    RegistrationSuccess = 2100,
    RegistrationFail = 2101,
    KeyExchangeAck = 2102,
    FileReceived = 2103,
    ConfirmOnly = 2104,
}

impl ResponseCode {
    pub const ALL: [ResponseCode; 5] = [
        ResponseCode::RegistrationSuccess,
        ResponseCode::RegistrationFail,
        ResponseCode::KeyExchangeAck,
        ResponseCode::FileReceived,
        ResponseCode::ConfirmOnly,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for ResponseCode {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        ResponseCode::ALL
            .into_iter()
            .find(|code| code.as_u16() == value)
            .ok_or(ProtocolError::UnknownResponseCode(value))
    }
}

/// Header shared by all requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Identifier claimed by the client (nil before registration).
    pub client_id: ClientId,
    /// Client protocol version.
    pub version: u8,
    /// Request code.
    pub code: RequestCode,
    /// Declared payload size. Only authoritative for file uploads.
    pub payload_size: u32,
}

impl RequestHeader {
    pub fn new(client_id: ClientId, code: RequestCode, payload_size: u32) -> Self {
        Self {
            client_id,
            version: crate::CLIENT_VERSION,
            code,
            payload_size,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.client_id.as_bytes());
        buf.put_u8(self.version);
        buf.put_u16_le(self.code.as_u16());
        buf.put_u32_le(self.payload_size);
    }

    /// Decodes a header from the first [`REQUEST_HEADER_SIZE`] bytes of `src`.
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(src, REQUEST_HEADER_SIZE)?;
        let mut src = &src[..REQUEST_HEADER_SIZE];
        let client_id = ClientId::read(&mut src);
        let version = src.get_u8();
        let code = RequestCode::try_from(src.get_u16_le())?;
        let payload_size = src.get_u32_le();
        Ok(Self {
            client_id,
            version,
            code,
            payload_size,
        })
    }
}

/// Header shared by all responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub version: u8,
    pub code: ResponseCode,
    pub payload_size: u32,
}

impl ResponseHeader {
    pub fn new(code: ResponseCode, payload_size: u32) -> Self {
        Self {
            version: crate::SERVER_VERSION,
            code,
            payload_size,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u16_le(self.code.as_u16());
        buf.put_u32_le(self.payload_size);
    }

    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(src, RESPONSE_HEADER_SIZE)?;
        let mut src = &src[..RESPONSE_HEADER_SIZE];
        let version = src.get_u8();
        let code = ResponseCode::try_from(src.get_u16_le())?;
        let payload_size = src.get_u32_le();
        Ok(Self {
            version,
            code,
            payload_size,
        })
    }
}

pub(crate) fn ensure_len(src: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if src.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: src.len(),
        });
    }
    Ok(())
}

/// Writes `value` into a NUL-padded field of `width` bytes.
///
/// Values longer than the field are a caller bug; they are truncated in
/// release builds.
pub fn put_fixed_str(buf: &mut BytesMut, value: &str, width: usize) {
    let bytes = value.as_bytes();
    debug_assert!(
        bytes.len() <= width,
        "text of {} bytes does not fit a {}-byte field",
        bytes.len(),
        width
    );
    let n = bytes.len().min(width);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(0, width - n);
}

/// Reads a NUL-padded field of `width` bytes, stopping at the first NUL.
pub fn get_fixed_str(
    src: &mut &[u8],
    width: usize,
    field: &'static str,
) -> Result<String, ProtocolError> {
    ensure_len(src, width)?;
    let raw = &src[..width];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    let text = std::str::from_utf8(&raw[..end])
        .map_err(|_| ProtocolError::InvalidUtf8(field))?
        .to_owned();
    src.advance(width);
    Ok(text)
}
