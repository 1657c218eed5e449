//! Registry contract for clients and their files.

use crate::error::Result;
use chrono::{DateTime, Utc};
use sealdrop_protocol::{ClientId, PublicKeyBytes, SYMMETRIC_KEY_SIZE};
use std::path::PathBuf;

/// A registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub id: ClientId,
    pub name: String,
    pub public_key: Option<PublicKeyBytes>,
    pub symmetric_key: Option<[u8; SYMMETRIC_KEY_SIZE]>,
    pub last_seen: DateTime<Utc>,
}

impl ClientRecord {
    /// A freshly registered client with no key material.
    pub fn new(id: ClientId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            public_key: None,
            symmetric_key: None,
            last_seen: now,
        }
    }
}

/// Metadata for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub client_id: ClientId,
    pub file_name: String,
    pub path: PathBuf,
    pub verified: bool,
}

/// Persistent client and file metadata.
///
/// Every method is individually atomic. Mutations of absent rows fail with
/// [`StorageError::ClientNotFound`](crate::StorageError::ClientNotFound) or
/// [`StorageError::FileNotFound`](crate::StorageError::FileNotFound).
pub trait ClientRegistry: Send + Sync {
    fn client_by_id(&self, id: &ClientId) -> Result<Option<ClientRecord>>;

    fn client_by_name(&self, name: &str) -> Result<Option<ClientRecord>>;

    /// Inserts a client. Fails on a duplicate name or id.
    fn insert_client(&self, record: &ClientRecord) -> Result<()>;

    fn set_public_key(&self, id: &ClientId, key: &PublicKeyBytes) -> Result<()>;

    fn set_symmetric_key(&self, id: &ClientId, key: &[u8; SYMMETRIC_KEY_SIZE]) -> Result<()>;

    /// Updates the last-seen timestamp.
    fn touch(&self, id: &ClientId, at: DateTime<Utc>) -> Result<()>;

    fn file(&self, client_id: &ClientId, file_name: &str) -> Result<Option<FileRecord>>;

    /// Inserts a file record unless one already exists for the same
    /// (client, file name). Returns whether a record was created.
    fn insert_file(&self, record: &FileRecord) -> Result<bool>;

    fn set_verified(&self, client_id: &ClientId, file_name: &str, verified: bool) -> Result<()>;

    /// Removes a file record, returning it.
    fn remove_file(&self, client_id: &ClientId, file_name: &str) -> Result<FileRecord>;

    fn client_count(&self) -> Result<usize>;
}

/// Behavior every registry implementation must share.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::StorageError;

    fn id(byte: u8) -> ClientId {
        ClientId::from_bytes([byte; 16])
    }

    fn file(client_id: ClientId, name: &str) -> FileRecord {
        FileRecord {
            client_id,
            file_name: name.to_string(),
            path: PathBuf::from(format!("files/{}", name)),
            verified: false,
        }
    }

    pub fn run_all(registry: &dyn ClientRegistry) {
        clients(registry);
        keys_and_touch(registry);
        files(registry);
        missing_rows(registry);
    }

    fn clients(registry: &dyn ClientRegistry) {
        let now = Utc::now();
        let alice = ClientRecord::new(id(1), "alice", now);
        registry.insert_client(&alice).unwrap();

        assert_eq!(registry.client_by_id(&id(1)).unwrap().unwrap().name, "alice");
        let by_name = registry.client_by_name("alice").unwrap().unwrap();
        assert_eq!(by_name.id, id(1));
        assert!(by_name.public_key.is_none());
        assert!(by_name.symmetric_key.is_none());
        assert!(registry.client_by_name("Alice").unwrap().is_none());

        let dup_name = ClientRecord::new(id(2), "alice", now);
        assert!(matches!(
            registry.insert_client(&dup_name),
            Err(StorageError::DuplicateName(_))
        ));
        let dup_id = ClientRecord::new(id(1), "alice2", now);
        assert!(matches!(
            registry.insert_client(&dup_id),
            Err(StorageError::DuplicateId(_))
        ));
        assert_eq!(registry.client_count().unwrap(), 1);
    }

    fn keys_and_touch(registry: &dyn ClientRegistry) {
        let bob = ClientRecord::new(id(3), "bob", Utc::now());
        registry.insert_client(&bob).unwrap();

        registry.set_public_key(&id(3), &[7u8; 160]).unwrap();
        registry.set_symmetric_key(&id(3), &[9u8; 16]).unwrap();
        // Overwrite on a later exchange
        registry.set_symmetric_key(&id(3), &[10u8; 16]).unwrap();

        let later = bob.last_seen + chrono::Duration::seconds(30);
        registry.touch(&id(3), later).unwrap();

        let stored = registry.client_by_id(&id(3)).unwrap().unwrap();
        assert_eq!(stored.public_key, Some([7u8; 160]));
        assert_eq!(stored.symmetric_key, Some([10u8; 16]));
        assert_eq!(stored.last_seen.timestamp(), later.timestamp());
    }

    fn files(registry: &dyn ClientRegistry) {
        let carol = ClientRecord::new(id(4), "carol", Utc::now());
        registry.insert_client(&carol).unwrap();

        assert!(registry.file(&id(4), "a.txt").unwrap().is_none());
        assert!(registry.insert_file(&file(id(4), "a.txt")).unwrap());
        registry.set_verified(&id(4), "a.txt", true).unwrap();

        // Re-inserting leaves the existing record alone
        assert!(!registry.insert_file(&file(id(4), "a.txt")).unwrap());
        let stored = registry.file(&id(4), "a.txt").unwrap().unwrap();
        assert!(stored.verified);
        assert_eq!(stored.path, PathBuf::from("files/a.txt"));

        // Same name under another client is a separate record
        assert!(registry.insert_file(&file(id(1), "a.txt")).unwrap());
        assert!(!registry.file(&id(1), "a.txt").unwrap().unwrap().verified);

        let removed = registry.remove_file(&id(4), "a.txt").unwrap();
        assert_eq!(removed.file_name, "a.txt");
        assert!(registry.file(&id(4), "a.txt").unwrap().is_none());
        assert!(registry.file(&id(1), "a.txt").unwrap().is_some());
    }

    fn missing_rows(registry: &dyn ClientRegistry) {
        let ghost = id(0xEE);
        assert!(registry.client_by_id(&ghost).unwrap().is_none());
        assert!(matches!(
            registry.set_public_key(&ghost, &[0u8; 160]),
            Err(StorageError::ClientNotFound(_))
        ));
        assert!(matches!(
            registry.set_symmetric_key(&ghost, &[0u8; 16]),
            Err(StorageError::ClientNotFound(_))
        ));
        assert!(registry.touch(&ghost, Utc::now()).unwrap_err().is_not_found());
        assert!(matches!(
            registry.set_verified(&id(4), "nope.txt", true),
            Err(StorageError::FileNotFound { .. })
        ));
        assert!(registry
            .remove_file(&id(4), "nope.txt")
            .unwrap_err()
            .is_not_found());
    }
}
