//! Encoder and streaming decoder for requests and responses.

use crate::error::ProtocolError;
use crate::frame::{RequestCode, RequestHeader, ResponseHeader, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE};
use crate::message::{Request, Response, FILE_UPLOAD_PREFIX_SIZE};
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, Bytes, BytesMut};

/// Encodes requests and responses.
pub struct Encoder;

impl Encoder {
    /// Encodes a request (header and body).
    pub fn encode_request(request: &Request) -> BytesMut {
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_SIZE + request.header().payload_size as usize);
        request.encode(&mut buf);
        buf
    }

    /// Encodes a response (header and payload).
    pub fn encode_response(response: &Response) -> BytesMut {
        let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_SIZE + response.payload_size() as usize);
        response.encode(&mut buf);
        buf
    }

    /// Encodes only the header of a response.
    pub fn encode_response_header(response: &Response) -> BytesMut {
        let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_SIZE);
        response.header().encode(&mut buf);
        buf
    }

    /// Encodes only the payload of a response.
    pub fn encode_response_payload(response: &Response) -> BytesMut {
        let mut buf = BytesMut::with_capacity(response.payload_size() as usize);
        response.encode_payload(&mut buf);
        buf
    }
}

/// Buffers incoming bytes and yields complete messages.
///
/// `decode_*` returns `Ok(None)` until a whole message is buffered. On error
/// the buffer is left as is; callers are expected to drop the connection.
pub struct Decoder {
    buffer: BytesMut,
    max_payload_size: u32,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_payload_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next request from the buffer.
    pub fn decode_request(&mut self) -> Result<Option<Request>, ProtocolError> {
        if self.buffer.len() < REQUEST_HEADER_SIZE {
            return Ok(None);
        }
        let header = RequestHeader::decode(&self.buffer)?;
        let body_len = self.request_body_len(&header)?;

        let total = REQUEST_HEADER_SIZE + body_len;
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(REQUEST_HEADER_SIZE);
        let body = self.buffer.split_to(body_len).freeze();
        Request::decode_body(header, body).map(Some)
    }

    /// Attempts to decode the next response from the buffer.
    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        if self.buffer.len() < RESPONSE_HEADER_SIZE {
            return Ok(None);
        }
        let header = ResponseHeader::decode(&self.buffer)?;
        if header.payload_size > self.max_payload_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: header.payload_size,
                max: self.max_payload_size,
            });
        }

        let total = RESPONSE_HEADER_SIZE + header.payload_size as usize;
        if self.buffer.len() < total {
            return Ok(None);
        }

        self.buffer.advance(RESPONSE_HEADER_SIZE);
        let payload: Bytes = self.buffer.split_to(header.payload_size as usize).freeze();
        Response::decode(&header, &payload).map(Some)
    }

    fn request_body_len(&self, header: &RequestHeader) -> Result<usize, ProtocolError> {
        if let Some(len) = header.code.body_len() {
            return Ok(len);
        }
        debug_assert_eq!(header.code, RequestCode::FileUpload);
        if header.payload_size > self.max_payload_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: header.payload_size,
                max: self.max_payload_size,
            });
        }
        if (header.payload_size as usize) < FILE_UPLOAD_PREFIX_SIZE {
            return Err(ProtocolError::PayloadTooSmall {
                size: header.payload_size,
                min: FILE_UPLOAD_PREFIX_SIZE as u32,
            });
        }
        Ok(header.payload_size as usize)
    }

    /// Total size of the request being buffered, as far as it is known.
    ///
    /// This is the header size until a header is available, and header plus
    /// body once it is.
    pub fn pending_request_len(&self) -> usize {
        if self.buffer.len() < REQUEST_HEADER_SIZE {
            return REQUEST_HEADER_SIZE;
        }
        RequestHeader::decode(&self.buffer)
            .and_then(|header| self.request_body_len(&header))
            .map(|body_len| REQUEST_HEADER_SIZE + body_len)
            .unwrap_or(REQUEST_HEADER_SIZE)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ClientId;
    use crate::message::{ChecksumOutcome, ChecksumReport, FileUpload, Registration};
    use bytes::BufMut;
    use proptest::prelude::*;

    fn upload(len: usize) -> Request {
        Request::from(FileUpload::new(
            ClientId::from_bytes([1; 16]),
            "blob.bin",
            Bytes::from(vec![0x42; len]),
        ))
    }

    #[test]
    fn test_decode_request_incremental() {
        let request = upload(64);
        let encoded = Encoder::encode_request(&request);

        let mut decoder = Decoder::new();
        for chunk in encoded.chunks(17) {
            assert!(decoder.decode_request().unwrap().is_none());
            decoder.extend(chunk);
        }
        assert_eq!(decoder.decode_request().unwrap(), Some(request));
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_decode_back_to_back_requests() {
        let first = Request::from(Registration::new(ClientId::nil(), "carol"));
        let second = Request::from(ChecksumReport::new(
            ClientId::from_bytes([5; 16]),
            ChecksumOutcome::Valid,
            "x.txt",
        ));

        let mut decoder = Decoder::new();
        decoder.extend(&Encoder::encode_request(&first));
        decoder.extend(&Encoder::encode_request(&second));

        assert_eq!(decoder.decode_request().unwrap(), Some(first));
        assert_eq!(decoder.decode_request().unwrap(), Some(second));
        assert_eq!(decoder.decode_request().unwrap(), None);
    }

    #[test]
    fn test_checksum_request_sized_by_code() {
        // Clients may leave payload_size at zero on checksum requests
        let request = Request::from(ChecksumReport::new(
            ClientId::from_bytes([2; 16]),
            ChecksumOutcome::Invalid,
            "y.txt",
        ));
        let mut encoded = Encoder::encode_request(&request);
        encoded[19..23].copy_from_slice(&0u32.to_le_bytes());

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);
        match decoder.decode_request().unwrap() {
            Some(Request::Checksum(report)) => {
                assert_eq!(report.outcome, ChecksumOutcome::Invalid);
                assert_eq!(report.file_name, "y.txt");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_upload_over_limit_rejected() {
        let mut decoder = Decoder::with_max_payload(1024);
        decoder.extend(&Encoder::encode_request(&upload(2048)));
        assert!(matches!(
            decoder.decode_request(),
            Err(ProtocolError::PayloadTooLarge { max: 1024, .. })
        ));
    }

    #[test]
    fn test_upload_under_prefix_rejected() {
        let mut buf = BytesMut::new();
        RequestHeader::new(ClientId::nil(), RequestCode::FileUpload, 100).encode(&mut buf);
        buf.put_bytes(0, 100);

        let mut decoder = Decoder::new();
        decoder.extend(&buf);
        assert!(matches!(
            decoder.decode_request(),
            Err(ProtocolError::PayloadTooSmall { size: 100, min: 275 })
        ));
    }

    #[test]
    fn test_unknown_code_rejected() {
        let mut buf = BytesMut::new();
        buf.put_bytes(0, 16);
        buf.put_u8(3);
        buf.put_u16_le(4242);
        buf.put_u32_le(0);

        let mut decoder = Decoder::new();
        decoder.extend(&buf);
        assert!(matches!(
            decoder.decode_request(),
            Err(ProtocolError::UnknownRequestCode(4242))
        ));
    }

    #[test]
    fn test_decode_response_split_header() {
        let response = Response::KeyExchangeAck {
            client_id: ClientId::from_bytes([8; 16]),
            wrapped_key: Bytes::from_static(&[1, 2, 3, 4]),
        };

        let mut decoder = Decoder::new();
        decoder.extend(&Encoder::encode_response_header(&response));
        assert!(decoder.decode_response().unwrap().is_none());
        decoder.extend(&Encoder::encode_response_payload(&response));
        assert_eq!(decoder.decode_response().unwrap(), Some(response));
    }

    #[test]
    fn test_pending_request_len() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.pending_request_len(), REQUEST_HEADER_SIZE);

        let encoded = Encoder::encode_request(&upload(10));
        decoder.extend(&encoded[..30]);
        assert_eq!(decoder.pending_request_len(), encoded.len());
    }

    #[test]
    fn test_clear() {
        let mut decoder = Decoder::new();
        decoder.extend(&[1, 2, 3]);
        assert_eq!(decoder.buffered(), 3);
        decoder.clear();
        assert!(decoder.is_empty());
    }

    proptest! {
        #[test]
        fn prop_decoder_never_panics(raw in prop::collection::vec(any::<u8>(), 0..600)) {
            let mut decoder = Decoder::with_max_payload(4096);
            decoder.extend(&raw);
            let _ = decoder.decode_request();
        }
    }
}
