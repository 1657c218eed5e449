//! Request handlers.
//!
//! Each request type has a synchronous operation that validates it against
//! the registry and produces the response. [`RequestHandler::run_session`]
//! drives those operations over a connection, including the one inline
//! re-read that follows an invalid-checksum report.

use crate::connection::Connection;
use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::session::{Session, SessionState};
use bytes::Bytes;
use chrono::Utc;
use sealdrop_crypto::{checksum, decrypt_content, generate_and_wrap_key, SymmetricKey};
use sealdrop_protocol::{
    ChecksumOutcome, ChecksumReport, ClientId, FileUpload, PublicKeyExchange, Registration,
    Request, Response, USERNAME_SIZE,
};
use sealdrop_storage::{ClientRecord, ClientRegistry, FileRecord, FileStore, StorageError};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Longest accepted username; the field keeps one byte for the terminator.
pub const MAX_USERNAME_LEN: usize = USERNAME_SIZE - 1;

/// Handles decoded requests for every session of a server.
#[derive(Clone)]
pub struct RequestHandler {
    registry: Arc<dyn ClientRegistry>,
    files: FileStore,
    /// Send RegistrationFail before closing on a rejected registration.
    reply_registration_failure: bool,
    /// Metrics for request tracking.
    metrics: Option<Arc<Metrics>>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(registry: Arc<dyn ClientRegistry>, files: FileStore) -> Self {
        Self {
            registry,
            files,
            reply_registration_failure: false,
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enables the RegistrationFail reply.
    pub fn with_registration_failure_reply(mut self, enabled: bool) -> Self {
        self.reply_registration_failure = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<dyn ClientRegistry> {
        &self.registry
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// Serves requests until the peer disconnects or a request fails.
    ///
    /// The session ends in [`SessionState::Terminated`] either way.
    pub async fn run_session<S>(
        &self,
        conn: &mut Connection<S>,
        session: &mut Session,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.serve(conn, session).await;
        session.set_state(SessionState::Terminated);
        if let (Err(e), Some(metrics)) = (&result, &self.metrics) {
            metrics.errors_total.with_label_values(&[e.kind().as_str()]).inc();
        }
        result
    }

    async fn serve<S>(&self, conn: &mut Connection<S>, session: &mut Session) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            session.set_state(SessionState::AwaitingHeader);
            let Some(request) = conn.read_request().await? else {
                tracing::debug!("[{}] Connection closed by client", session.remote_addr);
                return Ok(());
            };

            session.set_state(SessionState::Dispatching);
            let client_id = self.dispatch(conn, session, request).await?;

            self.registry.touch(&client_id, Utc::now())?;
            session.confirm(client_id);
        }
    }

    /// Handles one request, writing its response(s).
    ///
    /// Returns the identifier the request was confirmed for.
    async fn dispatch<S>(
        &self,
        conn: &mut Connection<S>,
        session: &mut Session,
        request: Request,
    ) -> Result<ClientId, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let addr = session.remote_addr;
        let code = request.code();
        tracing::info!(
            "[{}] Request: {} (client={})",
            addr,
            code,
            request.header().client_id
        );

        let timer = self.metrics.as_ref().map(|m| {
            m.requests_total.with_label_values(&[code.name()]).inc();
            m.request_duration
                .with_label_values(&[code.name()])
                .start_timer()
        });

        let result = match request {
            Request::Registration(req) => match self.register(&req) {
                Err(e) if self.reply_registration_failure => {
                    conn.send(&Response::RegistrationFail).await?;
                    Err(e)
                }
                result => reply(conn, result).await,
            },
            Request::PublicKeyExchange(req) => reply(conn, self.exchange_keys(&req)).await,
            Request::FileUpload(req) => reply(conn, self.store_upload(req).await).await,
            Request::Checksum(report) => {
                session.set_state(SessionState::CrcCheck);
                self.handle_checksum(conn, &report).await
            }
        };
        drop(timer);

        match &result {
            Ok(_) => tracing::info!("[{}] Completed {}", addr, code.name()),
            Err(e) => tracing::warn!("[{}] {} failed: {}", addr, code.name(), e),
        }
        result
    }

    async fn handle_checksum<S>(
        &self,
        conn: &mut Connection<S>,
        report: &ChecksumReport,
    ) -> Result<ClientId, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let response = self.confirm_checksum(report)?;
        conn.send(&response).await?;

        if report.outcome != ChecksumOutcome::Invalid {
            return Ok(report.client_id);
        }

        // The client resends the file straight away.
        let upload = match conn.read_request().await? {
            Some(Request::FileUpload(upload)) => upload,
            Some(other) => {
                return Err(ServerError::UnexpectedRequest {
                    expected: "FILE_UPLOAD",
                    actual: other.code(),
                })
            }
            None => return Err(ServerError::ConnectionClosed("awaiting resent file")),
        };
        tracing::info!(
            "[{}] Resend of {:?} after invalid checksum",
            conn.peer_addr(),
            upload.file_name
        );
        reply(conn, self.store_upload(upload).await).await
    }

    /// Runs [`Self::receive_file`] on the blocking pool.
    async fn store_upload(&self, req: FileUpload) -> Result<(ClientId, Response), ServerError> {
        let handler = self.clone();
        tokio::task::spawn_blocking(move || handler.receive_file(&req)).await?
    }

    /// Registers a new client under a fresh identifier.
    pub fn register(&self, req: &Registration) -> Result<(ClientId, Response), ServerError> {
        validate_username(&req.username)?;

        if self.registry.client_by_name(&req.username)?.is_some() {
            return Err(ServerError::DuplicateUsername(req.username.clone()));
        }

        let client_id = ClientId::from_bytes(*Uuid::new_v4().as_bytes());
        let record = ClientRecord::new(client_id, &req.username, Utc::now());
        self.registry.insert_client(&record).map_err(|e| match e {
            StorageError::DuplicateName(name) => ServerError::DuplicateUsername(name),
            other => other.into(),
        })?;

        if let Some(ref metrics) = self.metrics {
            if let Ok(count) = self.registry.client_count() {
                metrics.clients_registered.set(count as f64);
            }
        }
        tracing::info!("Registered {:?} as {}", req.username, client_id);
        Ok((client_id, Response::RegistrationSuccess { client_id }))
    }

    /// Stores the client's public key and hands out a new session key.
    pub fn exchange_keys(&self, req: &PublicKeyExchange) -> Result<(ClientId, Response), ServerError> {
        let client = self
            .registry
            .client_by_name(&req.username)?
            .ok_or_else(|| ServerError::UnknownUsername(req.username.clone()))?;
        if client.id != req.header.client_id {
            return Err(ServerError::ClientMismatch {
                name: req.username.clone(),
                claimed: req.header.client_id,
            });
        }

        let (key, wrapped) = generate_and_wrap_key(&req.public_key)?;
        self.registry.set_public_key(&client.id, &req.public_key)?;
        self.registry.set_symmetric_key(&client.id, key.as_bytes())?;

        tracing::debug!(
            "Issued session key to {} ({} wrapped bytes)",
            client.id,
            wrapped.len()
        );
        Ok((
            client.id,
            Response::KeyExchangeAck {
                client_id: client.id,
                wrapped_key: Bytes::from(wrapped),
            },
        ))
    }

    /// Decrypts and stores an uploaded file, returning its checksum.
    pub fn receive_file(&self, req: &FileUpload) -> Result<(ClientId, Response), ServerError> {
        let client = self.require_client(&req.client_id)?;
        let key = client
            .symmetric_key
            .map(SymmetricKey::from_bytes)
            .ok_or(ServerError::MissingSymmetricKey(client.id))?;

        let plaintext = decrypt_content(&key, &req.content)?;
        let crc = checksum(&plaintext);

        let path = self.files.write(&client.name, &req.file_name, &plaintext)?;
        let created = match self.registry.insert_file(&FileRecord {
            client_id: client.id,
            file_name: req.file_name.clone(),
            path: path.clone(),
            verified: false,
        }) {
            Ok(created) => created,
            Err(e) => {
                if let Err(cleanup) = self.files.remove(&path) {
                    tracing::warn!("Failed to remove {}: {}", path.display(), cleanup);
                }
                return Err(e.into());
            }
        };

        if let Some(ref metrics) = self.metrics {
            metrics.files_received_total.inc();
            metrics.bytes_received_total.inc_by(plaintext.len() as f64);
        }
        tracing::info!(
            "Stored {:?} for {} ({} bytes, cksum {}, {})",
            req.file_name,
            client.name,
            plaintext.len(),
            crc,
            if created { "new" } else { "overwrite" }
        );

        Ok((
            client.id,
            Response::FileReceived {
                client_id: client.id,
                content_size: req.content_size,
                file_name: req.file_name.clone(),
                checksum: crc,
            },
        ))
    }

    /// Applies a checksum outcome to the file record.
    ///
    /// An invalid outcome changes nothing; the caller reads the resent file.
    pub fn confirm_checksum(&self, report: &ChecksumReport) -> Result<Response, ServerError> {
        let client = self.require_client(&report.client_id)?;

        match report.outcome {
            ChecksumOutcome::Valid => {
                self.registry
                    .set_verified(&client.id, &report.file_name, true)
                    .map_err(file_error)?;
                tracing::info!("Verified {:?} for {}", report.file_name, client.name);
            }
            ChecksumOutcome::Invalid => {
                tracing::info!(
                    "Checksum mismatch on {:?} for {}, awaiting resend",
                    report.file_name,
                    client.name
                );
            }
            ChecksumOutcome::RetryLimit => {
                let record = self
                    .registry
                    .remove_file(&client.id, &report.file_name)
                    .map_err(file_error)?;
                let existed = self.files.remove(&record.path)?;
                tracing::warn!(
                    "Dropped {:?} for {} after retry limit (bytes {})",
                    report.file_name,
                    client.name,
                    if existed { "deleted" } else { "already gone" }
                );
            }
        }
        Ok(Response::ConfirmOnly)
    }

    fn require_client(&self, id: &ClientId) -> Result<ClientRecord, ServerError> {
        self.registry
            .client_by_id(id)?
            .ok_or(ServerError::UnknownClient(*id))
    }
}

/// Sends the response of a successful operation.
async fn reply<S>(
    conn: &mut Connection<S>,
    result: Result<(ClientId, Response), ServerError>,
) -> Result<ClientId, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (client_id, response) = result?;
    conn.send(&response).await?;
    Ok(client_id)
}

fn file_error(err: StorageError) -> ServerError {
    match err {
        StorageError::FileNotFound {
            client_id,
            file_name,
        } => ServerError::FileNotFound {
            client_id,
            file_name,
        },
        other => other.into(),
    }
}

/// Usernames are 1 to 254 bytes of ASCII letters, digits and spaces.
pub fn validate_username(name: &str) -> Result<(), ServerError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b' ');
    if !valid {
        return Err(ServerError::InvalidUsername(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdrop_crypto::{encrypt_content, unwrap_key, ClientKeyPair};
    use sealdrop_protocol::{Decoder, Encoder, RequestCode, MAX_PAYLOAD_SIZE};
    use chrono::DateTime;
    use sealdrop_protocol::PublicKeyBytes;
    use sealdrop_storage::error::Result as StorageResult;
    use sealdrop_storage::MemoryRegistry;
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn test_handler() -> (TempDir, RequestHandler) {
        let dir = TempDir::new().unwrap();
        let files = FileStore::new(dir.path().join("files")).unwrap();
        let handler = RequestHandler::new(Arc::new(MemoryRegistry::new()), files);
        (dir, handler)
    }

    fn registered(handler: &RequestHandler, name: &str) -> ClientId {
        let (id, _) = handler
            .register(&Registration::new(ClientId::nil(), name))
            .unwrap();
        id
    }

    /// Registers `name` and gives it a known session key.
    fn with_key(handler: &RequestHandler, name: &str, key: [u8; 16]) -> ClientId {
        let id = registered(handler, name);
        handler.registry().set_symmetric_key(&id, &key).unwrap();
        id
    }

    fn upload(id: ClientId, name: &str, key: [u8; 16], plaintext: &[u8]) -> FileUpload {
        let ciphertext = encrypt_content(&SymmetricKey::from_bytes(key), plaintext);
        FileUpload::new(id, name, Bytes::from(ciphertext))
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("Bob Smith 2").is_ok());
        assert!(validate_username(&"a".repeat(254)).is_ok());

        assert!(validate_username("").is_err());
        assert!(validate_username(&"a".repeat(255)).is_err());
        assert!(validate_username("bob!").is_err());
        assert!(validate_username("tab\there").is_err());
        assert!(validate_username("café").is_err());
    }

    #[test]
    fn test_register() {
        let (_dir, handler) = test_handler();
        let (id, response) = handler
            .register(&Registration::new(ClientId::nil(), "alice"))
            .unwrap();

        assert_eq!(response, Response::RegistrationSuccess { client_id: id });
        assert!(!id.is_nil());
        let stored = handler.registry().client_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.name, "alice");
        assert!(stored.public_key.is_none());
        assert!(stored.symmetric_key.is_none());
    }

    #[test]
    fn test_register_duplicate_and_invalid() {
        let (_dir, handler) = test_handler();
        registered(&handler, "alice");

        let err = handler
            .register(&Registration::new(ClientId::nil(), "alice"))
            .unwrap_err();
        assert!(matches!(err, ServerError::DuplicateUsername(_)));

        let err = handler
            .register(&Registration::new(ClientId::nil(), "al/ice"))
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidUsername(_)));
        assert_eq!(handler.registry().client_count().unwrap(), 1);
    }

    #[test]
    fn test_exchange_keys() {
        let (_dir, handler) = test_handler();
        let id = registered(&handler, "bob");
        let pair = ClientKeyPair::generate().unwrap();
        let public_key = pair.public_key_bytes().unwrap();

        let (confirmed, response) = handler
            .exchange_keys(&PublicKeyExchange::new(id, "bob", public_key))
            .unwrap();
        assert_eq!(confirmed, id);

        let Response::KeyExchangeAck {
            client_id,
            wrapped_key,
        } = response
        else {
            panic!("expected KeyExchangeAck");
        };
        assert_eq!(client_id, id);

        let key = unwrap_key(&pair, &wrapped_key).unwrap();
        let stored = handler.registry().client_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.symmetric_key, Some(*key.as_bytes()));
        assert_eq!(stored.public_key, Some(public_key));
    }

    #[test]
    fn test_exchange_keys_rejections() {
        let (_dir, handler) = test_handler();
        let id = registered(&handler, "bob");
        let other = registered(&handler, "eve");

        let err = handler
            .exchange_keys(&PublicKeyExchange::new(id, "nobody", [0u8; 160]))
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownUsername(_)));

        let err = handler
            .exchange_keys(&PublicKeyExchange::new(other, "bob", [0u8; 160]))
            .unwrap_err();
        assert!(matches!(err, ServerError::ClientMismatch { .. }));

        // Garbage key material fails without storing anything
        let err = handler
            .exchange_keys(&PublicKeyExchange::new(id, "bob", [0xAB; 160]))
            .unwrap_err();
        assert!(matches!(err, ServerError::Crypto(_)));
        let stored = handler.registry().client_by_id(&id).unwrap().unwrap();
        assert!(stored.public_key.is_none());
        assert!(stored.symmetric_key.is_none());
    }

    #[test]
    fn test_receive_file() {
        let (dir, handler) = test_handler();
        let key = [0x42; 16];
        let id = with_key(&handler, "carol", key);

        let req = upload(id, "hello.txt", key, b"123456789");
        let (_, response) = handler.receive_file(&req).unwrap();

        assert_eq!(
            response,
            Response::FileReceived {
                client_id: id,
                content_size: 16,
                file_name: "hello.txt".to_string(),
                checksum: 930766865,
            }
        );
        let path = dir.path().join("files").join("carol").join("hello.txt");
        assert_eq!(std::fs::read(&path).unwrap(), b"123456789");

        let record = handler.registry().file(&id, "hello.txt").unwrap().unwrap();
        assert!(!record.verified);
        assert_eq!(record.path, path);
    }

    #[test]
    fn test_receive_file_overwrite_keeps_record() {
        let (_dir, handler) = test_handler();
        let key = [0x42; 16];
        let id = with_key(&handler, "carol", key);

        handler
            .receive_file(&upload(id, "f.txt", key, b"v1"))
            .unwrap();
        handler
            .registry()
            .set_verified(&id, "f.txt", true)
            .unwrap();
        handler
            .receive_file(&upload(id, "f.txt", key, b"v2"))
            .unwrap();

        let record = handler.registry().file(&id, "f.txt").unwrap().unwrap();
        assert!(record.verified);
        assert_eq!(std::fs::read(&record.path).unwrap(), b"v2");
    }

    #[test]
    fn test_receive_file_rejections() {
        let (_dir, handler) = test_handler();
        let no_key = registered(&handler, "dave");

        let err = handler
            .receive_file(&upload(ClientId::from_bytes([9; 16]), "x", [0; 16], b"x"))
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownClient(_)));

        let err = handler
            .receive_file(&upload(no_key, "x", [0; 16], b"x"))
            .unwrap_err();
        assert!(matches!(err, ServerError::MissingSymmetricKey(_)));

        let key = [1; 16];
        let id = with_key(&handler, "erin", key);
        let bad = FileUpload::new(id, "x", Bytes::from_static(&[0u8; 15]));
        assert!(matches!(
            handler.receive_file(&bad).unwrap_err(),
            ServerError::Crypto(_)
        ));

        let traversal = upload(id, "../escape", key, b"x");
        assert!(matches!(
            handler.receive_file(&traversal).unwrap_err(),
            ServerError::Storage(_)
        ));
    }

    #[test]
    fn test_receive_file_dots_inside_name() {
        let (dir, handler) = test_handler();
        let key = [0x42; 16];
        let id = with_key(&handler, "alice", key);

        let (_, response) = handler
            .receive_file(&upload(id, "report..final.pdf", key, b"numbers"))
            .unwrap();
        assert!(matches!(response, Response::FileReceived { .. }));

        let path = dir.path().join("files").join("alice").join("report..final.pdf");
        assert_eq!(std::fs::read(path).unwrap(), b"numbers");
        assert!(handler.registry().file(&id, "report..final.pdf").unwrap().is_some());
    }

    /// Registry that refuses every file record.
    struct RejectingFiles(MemoryRegistry);

    impl ClientRegistry for RejectingFiles {
        fn client_by_id(&self, id: &ClientId) -> StorageResult<Option<ClientRecord>> {
            self.0.client_by_id(id)
        }

        fn client_by_name(&self, name: &str) -> StorageResult<Option<ClientRecord>> {
            self.0.client_by_name(name)
        }

        fn insert_client(&self, record: &ClientRecord) -> StorageResult<()> {
            self.0.insert_client(record)
        }

        fn set_public_key(&self, id: &ClientId, key: &PublicKeyBytes) -> StorageResult<()> {
            self.0.set_public_key(id, key)
        }

        fn set_symmetric_key(&self, id: &ClientId, key: &[u8; 16]) -> StorageResult<()> {
            self.0.set_symmetric_key(id, key)
        }

        fn touch(&self, id: &ClientId, at: DateTime<Utc>) -> StorageResult<()> {
            self.0.touch(id, at)
        }

        fn file(&self, client_id: &ClientId, name: &str) -> StorageResult<Option<FileRecord>> {
            self.0.file(client_id, name)
        }

        fn insert_file(&self, record: &FileRecord) -> StorageResult<bool> {
            Err(StorageError::ClientNotFound(record.client_id))
        }

        fn set_verified(&self, client_id: &ClientId, name: &str, verified: bool) -> StorageResult<()> {
            self.0.set_verified(client_id, name, verified)
        }

        fn remove_file(&self, client_id: &ClientId, name: &str) -> StorageResult<FileRecord> {
            self.0.remove_file(client_id, name)
        }

        fn client_count(&self) -> StorageResult<usize> {
            self.0.client_count()
        }
    }

    #[test]
    fn test_receive_file_removes_bytes_without_record() {
        let dir = TempDir::new().unwrap();
        let files = FileStore::new(dir.path().join("files")).unwrap();
        let handler = RequestHandler::new(Arc::new(RejectingFiles(MemoryRegistry::new())), files);
        let key = [0x42; 16];
        let id = with_key(&handler, "gina", key);

        let err = handler
            .receive_file(&upload(id, "orphan.bin", key, b"payload"))
            .unwrap_err();
        assert!(matches!(err, ServerError::Storage(StorageError::ClientNotFound(_))));
        assert!(!dir.path().join("files").join("gina").join("orphan.bin").exists());
    }

    #[tokio::test]
    async fn test_store_upload_on_blocking_pool() {
        let (_dir, handler) = test_handler();
        let key = [0x42; 16];
        let id = with_key(&handler, "hank", key);

        let (confirmed, response) = handler
            .store_upload(upload(id, "big.bin", key, &[7u8; 4096]))
            .await
            .unwrap();
        assert_eq!(confirmed, id);
        let expected = checksum(&[7u8; 4096]);
        assert!(matches!(
            response,
            Response::FileReceived { checksum, .. } if checksum == expected
        ));

        let err = handler
            .store_upload(upload(ClientId::from_bytes([9; 16]), "x", key, b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownClient(_)));
    }

    #[test]
    fn test_confirm_checksum_outcomes() {
        let (_dir, handler) = test_handler();
        let key = [7; 16];
        let id = with_key(&handler, "frank", key);
        handler
            .receive_file(&upload(id, "a.txt", key, b"data"))
            .unwrap();

        let valid = ChecksumReport::new(id, ChecksumOutcome::Valid, "a.txt");
        assert_eq!(handler.confirm_checksum(&valid).unwrap(), Response::ConfirmOnly);
        assert!(handler.registry().file(&id, "a.txt").unwrap().unwrap().verified);

        let path = handler.registry().file(&id, "a.txt").unwrap().unwrap().path;
        let limit = ChecksumReport::new(id, ChecksumOutcome::RetryLimit, "a.txt");
        assert_eq!(handler.confirm_checksum(&limit).unwrap(), Response::ConfirmOnly);
        assert!(handler.registry().file(&id, "a.txt").unwrap().is_none());
        assert!(!path.exists());

        // Both need an existing record
        for outcome in [ChecksumOutcome::Valid, ChecksumOutcome::RetryLimit] {
            let report = ChecksumReport::new(id, outcome, "a.txt");
            assert!(matches!(
                handler.confirm_checksum(&report).unwrap_err(),
                ServerError::FileNotFound { .. }
            ));
        }

        let unknown = ChecksumReport::new(ClientId::from_bytes([3; 16]), ChecksumOutcome::Invalid, "a.txt");
        assert!(matches!(
            handler.confirm_checksum(&unknown).unwrap_err(),
            ServerError::UnknownClient(_)
        ));
    }

    // Session-level tests over an in-memory duplex stream.

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn spawn_session(
        handler: Arc<RequestHandler>,
    ) -> (DuplexStream, tokio::task::JoinHandle<(Result<(), ServerError>, Session)>) {
        let (client, server) = duplex(64 * 1024);
        let task = tokio::spawn(async move {
            let mut conn = Connection::new(server, peer(), MAX_PAYLOAD_SIZE);
            let mut session = Session::new(peer());
            let result = handler.run_session(&mut conn, &mut session).await;
            (result, session)
        });
        (client, task)
    }

    async fn send(client: &mut DuplexStream, request: impl Into<Request>) {
        let bytes = Encoder::encode_request(&request.into());
        client.write_all(&bytes).await.unwrap();
    }

    async fn recv(client: &mut DuplexStream) -> Option<Response> {
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 1024];
        loop {
            if let Some(response) = decoder.decode_response().unwrap() {
                return Some(response);
            }
            let n = client.read(&mut buf).await.unwrap();
            if n == 0 {
                return None;
            }
            decoder.extend(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_session_updates_last_seen() {
        let (_dir, handler) = test_handler();
        let handler = Arc::new(handler);
        let key = [5; 16];
        let id = with_key(&handler, "gina", key);
        let before = handler.registry().client_by_id(&id).unwrap().unwrap().last_seen;

        let (mut client, task) = spawn_session(handler.clone());
        send(&mut client, upload(id, "n.txt", key, b"abc")).await;
        assert!(matches!(
            recv(&mut client).await,
            Some(Response::FileReceived { .. })
        ));
        drop(client);

        let (result, session) = task.await.unwrap();
        assert!(result.is_ok());
        assert!(session.is_terminated());
        assert_eq!(session.client_id(), Some(id));
        assert_eq!(session.request_count(), 1);

        let after = handler.registry().client_by_id(&id).unwrap().unwrap().last_seen;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn test_session_invalid_checksum_inline_resend() {
        let (_dir, handler) = test_handler();
        let handler = Arc::new(handler);
        let key = [8; 16];
        let id = with_key(&handler, "hank", key);

        let (mut client, task) = spawn_session(handler.clone());
        send(&mut client, upload(id, "r.bin", key, b"corrupted")).await;
        recv(&mut client).await.unwrap();

        send(&mut client, ChecksumReport::new(id, ChecksumOutcome::Invalid, "r.bin")).await;
        assert_eq!(recv(&mut client).await, Some(Response::ConfirmOnly));

        send(&mut client, upload(id, "r.bin", key, b"123456789")).await;
        match recv(&mut client).await {
            Some(Response::FileReceived { checksum, .. }) => assert_eq!(checksum, 930766865),
            other => panic!("unexpected response: {:?}", other),
        }

        send(&mut client, ChecksumReport::new(id, ChecksumOutcome::Valid, "r.bin")).await;
        assert_eq!(recv(&mut client).await, Some(Response::ConfirmOnly));
        drop(client);

        let (result, session) = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(session.request_count(), 3);
        let record = handler.registry().file(&id, "r.bin").unwrap().unwrap();
        assert!(record.verified);
        assert_eq!(std::fs::read(&record.path).unwrap(), b"123456789");
    }

    #[tokio::test]
    async fn test_session_invalid_checksum_then_wrong_request() {
        let (_dir, handler) = test_handler();
        let handler = Arc::new(handler);
        let key = [8; 16];
        let id = with_key(&handler, "ivan", key);

        let (mut client, task) = spawn_session(handler.clone());
        send(&mut client, upload(id, "r.bin", key, b"x")).await;
        recv(&mut client).await.unwrap();
        send(&mut client, ChecksumReport::new(id, ChecksumOutcome::Invalid, "r.bin")).await;
        assert_eq!(recv(&mut client).await, Some(Response::ConfirmOnly));

        send(&mut client, ChecksumReport::new(id, ChecksumOutcome::Valid, "r.bin")).await;
        assert_eq!(recv(&mut client).await, None);

        let (result, session) = task.await.unwrap();
        assert!(matches!(
            result,
            Err(ServerError::UnexpectedRequest {
                actual: RequestCode::ChecksumValid,
                ..
            })
        ));
        assert!(session.is_terminated());
    }

    #[tokio::test]
    async fn test_session_silent_registration_failure() {
        let (_dir, handler) = test_handler();
        let handler = Arc::new(handler);
        registered(&handler, "judy");

        let (mut client, task) = spawn_session(handler.clone());
        send(&mut client, Registration::new(ClientId::nil(), "judy")).await;
        assert_eq!(recv(&mut client).await, None);

        let (result, _) = task.await.unwrap();
        assert!(matches!(result, Err(ServerError::DuplicateUsername(_))));
    }

    #[tokio::test]
    async fn test_session_registration_failure_reply() {
        let (_dir, handler) = test_handler();
        let handler = Arc::new(handler.with_registration_failure_reply(true));
        registered(&handler, "judy");

        let (mut client, task) = spawn_session(handler.clone());
        send(&mut client, Registration::new(ClientId::nil(), "judy")).await;
        assert_eq!(recv(&mut client).await, Some(Response::RegistrationFail));
        assert_eq!(recv(&mut client).await, None);

        let (result, _) = task.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_session_unknown_code_terminates() {
        let (_dir, handler) = test_handler();
        let (mut client, task) = spawn_session(Arc::new(handler));

        let mut raw = vec![0u8; 16];
        raw.push(3);
        raw.extend_from_slice(&1102u16.to_le_bytes());
        raw.extend_from_slice(&0u32.to_le_bytes());
        client.write_all(&raw).await.unwrap();

        assert_eq!(recv(&mut client).await, None);
        let (result, session) = task.await.unwrap();
        assert!(matches!(result, Err(ServerError::Decode(_))));
        assert_eq!(session.request_count(), 0);
    }
}
