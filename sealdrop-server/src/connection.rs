//! Framed request/response I/O over one client stream.

use crate::error::ServerError;
use sealdrop_protocol::{Decoder, Encoder, ProtocolError, Request, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_BUFFER_SIZE: usize = 8192;

/// A client stream with its decode buffer.
pub struct Connection<S> {
    stream: S,
    addr: SocketAddr,
    decoder: Decoder,
    buf: Vec<u8>,
    idle_timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, addr: SocketAddr, max_payload_size: u32) -> Self {
        Self {
            stream,
            addr,
            decoder: Decoder::with_max_payload(max_payload_size),
            buf: vec![0u8; READ_BUFFER_SIZE],
            idle_timeout: None,
        }
    }

    /// Sets how long a read may wait for data.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Reads the next complete request.
    ///
    /// Returns `Ok(None)` if the peer closed the connection between requests.
    pub async fn read_request(&mut self) -> Result<Option<Request>, ServerError> {
        loop {
            if let Some(request) = self.decoder.decode_request()? {
                return Ok(Some(request));
            }

            let n = self.read_some().await?;
            if n == 0 {
                if self.decoder.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Truncated {
                    needed: self.decoder.pending_request_len(),
                    available: self.decoder.buffered(),
                }
                .into());
            }
            tracing::debug!("[{}] Received {} bytes", self.addr, n);
            self.decoder.extend(&self.buf[..n]);
        }
    }

    async fn read_some(&mut self) -> Result<usize, ServerError> {
        let read = self.stream.read(&mut self.buf);
        let n = match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ServerError::IdleTimeout)??,
            None => read.await?,
        };
        Ok(n)
    }

    /// Writes a response.
    ///
    /// KeyExchangeAck goes out as two writes, header then payload; every
    /// other response is a single write.
    pub async fn send(&mut self, response: &Response) -> Result<(), ServerError> {
        if let Response::KeyExchangeAck { .. } = response {
            let header = Encoder::encode_response_header(response);
            let payload = Encoder::encode_response_payload(response);
            self.stream.write_all(&header).await?;
            self.stream.write_all(&payload).await?;
            tracing::debug!(
                "[{}] Wrote {} + {} bytes",
                self.addr,
                header.len(),
                payload.len()
            );
        } else {
            let bytes = Encoder::encode_response(response);
            self.stream.write_all(&bytes).await?;
            tracing::debug!("[{}] Wrote {} bytes", self.addr, bytes.len());
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Shuts down the write half.
    pub async fn shutdown(&mut self) -> Result<(), ServerError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sealdrop_protocol::{
        ClientId, FileUpload, Registration, ResponseCode, ResponseHeader, MAX_PAYLOAD_SIZE,
        RESPONSE_HEADER_SIZE,
    };
    use tokio::io::duplex;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_read_request_across_writes() {
        let (mut client, server) = duplex(64);
        let mut conn = Connection::new(server, addr(), MAX_PAYLOAD_SIZE);

        let request = Request::from(FileUpload::new(
            ClientId::from_bytes([1; 16]),
            "a.bin",
            Bytes::from(vec![3u8; 100]),
        ));
        let bytes = Encoder::encode_request(&request);
        let writer = tokio::spawn(async move {
            for chunk in bytes.chunks(10) {
                client.write_all(chunk).await.unwrap();
            }
            client
        });

        assert_eq!(conn.read_request().await.unwrap(), Some(request));
        drop(writer.await.unwrap());
        assert_eq!(conn.read_request().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_mid_request_is_truncation() {
        let (mut client, server) = duplex(1024);
        let mut conn = Connection::new(server, addr(), MAX_PAYLOAD_SIZE);

        let bytes = Encoder::encode_request(&Request::from(Registration::new(
            ClientId::nil(),
            "alice",
        )));
        client.write_all(&bytes[..40]).await.unwrap();
        drop(client);

        let err = conn.read_request().await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Decode(ProtocolError::Truncated {
                needed: 278,
                available: 40
            })
        ));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let (_client, server) = duplex(64);
        let mut conn = Connection::new(server, addr(), MAX_PAYLOAD_SIZE)
            .with_idle_timeout(Some(Duration::from_millis(20)));
        assert!(matches!(
            conn.read_request().await,
            Err(ServerError::IdleTimeout)
        ));
    }

    #[tokio::test]
    async fn test_send_key_exchange_ack() {
        let (mut client, server) = duplex(1024);
        let mut conn = Connection::new(server, addr(), MAX_PAYLOAD_SIZE);

        let response = Response::KeyExchangeAck {
            client_id: ClientId::from_bytes([6; 16]),
            wrapped_key: Bytes::from_static(&[9; 128]),
        };
        conn.send(&response).await.unwrap();

        let mut header = [0u8; RESPONSE_HEADER_SIZE];
        client.read_exact(&mut header).await.unwrap();
        let header = ResponseHeader::decode(&header).unwrap();
        assert_eq!(header.code, ResponseCode::KeyExchangeAck);
        assert_eq!(header.payload_size, 144);

        let mut payload = vec![0u8; 144];
        client.read_exact(&mut payload).await.unwrap();
        assert_eq!(Response::decode(&header, &payload).unwrap(), response);
    }
}
