//! # sealdrop-protocol
//!
//! Wire protocol implementation for sealdrop.
//!
//! This crate provides:
//! - Fixed-layout request and response headers (little-endian)
//! - NUL-padded fixed-width text fields
//! - Typed request/response messages with exact byte encodings
//! - A streaming decoder that frames requests by their code

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{
    ClientId, RequestCode, RequestHeader, ResponseCode, ResponseHeader, REQUEST_HEADER_SIZE,
    RESPONSE_HEADER_SIZE,
};
pub use message::{
    ChecksumOutcome, ChecksumReport, FileUpload, PublicKeyExchange, Registration, Request,
    Response, FILE_RECEIVED_PAYLOAD_SIZE, FILE_UPLOAD_PREFIX_SIZE,
};

/// Version byte the server stamps on every response header.
pub const SERVER_VERSION: u8 = 3;

/// Version byte the reference client stamps on every request header.
pub const CLIENT_VERSION: u8 = 3;

/// Default port for the sealdrop server.
pub const DEFAULT_PORT: u16 = 1234;

/// Maximum payload size accepted for a single message (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Size of a client identifier.
pub const CLIENT_ID_SIZE: usize = 16;

/// Width of the username field, including room for a NUL terminator.
pub const USERNAME_SIZE: usize = 255;

/// Size of the raw public key field.
pub const PUBLIC_KEY_SIZE: usize = 160;

/// Size of the symmetric key handed out during key exchange.
pub const SYMMETRIC_KEY_SIZE: usize = 16;

/// Width of the file name field.
pub const FILE_NAME_SIZE: usize = 255;

/// Size of the checksum field.
pub const CHECKSUM_SIZE: usize = 4;

/// Raw public key material as carried on the wire.
pub type PublicKeyBytes = [u8; PUBLIC_KEY_SIZE];
