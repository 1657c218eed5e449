//! In-memory registry, for tests and ephemeral deployments.

use crate::error::{Result, StorageError};
use crate::registry::{ClientRecord, ClientRegistry, FileRecord};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sealdrop_protocol::{ClientId, PublicKeyBytes, SYMMETRIC_KEY_SIZE};
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    clients: HashMap<ClientId, ClientRecord>,
    names: HashMap<String, ClientId>,
    files: HashMap<(ClientId, String), FileRecord>,
}

impl Inner {
    fn client_mut(&mut self, id: &ClientId) -> Result<&mut ClientRecord> {
        self.clients
            .get_mut(id)
            .ok_or(StorageError::ClientNotFound(*id))
    }
}

/// Registry held entirely in memory behind a single lock.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: RwLock<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn file_key(client_id: &ClientId, file_name: &str) -> (ClientId, String) {
    (*client_id, file_name.to_string())
}

impl ClientRegistry for MemoryRegistry {
    fn client_by_id(&self, id: &ClientId) -> Result<Option<ClientRecord>> {
        Ok(self.inner.read().clients.get(id).cloned())
    }

    fn client_by_name(&self, name: &str) -> Result<Option<ClientRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .names
            .get(name)
            .and_then(|id| inner.clients.get(id))
            .cloned())
    }

    fn insert_client(&self, record: &ClientRecord) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.clients.contains_key(&record.id) {
            return Err(StorageError::DuplicateId(record.id));
        }
        if inner.names.contains_key(&record.name) {
            return Err(StorageError::DuplicateName(record.name.clone()));
        }
        inner.names.insert(record.name.clone(), record.id);
        inner.clients.insert(record.id, record.clone());
        Ok(())
    }

    fn set_public_key(&self, id: &ClientId, key: &PublicKeyBytes) -> Result<()> {
        self.inner.write().client_mut(id)?.public_key = Some(*key);
        Ok(())
    }

    fn set_symmetric_key(&self, id: &ClientId, key: &[u8; SYMMETRIC_KEY_SIZE]) -> Result<()> {
        self.inner.write().client_mut(id)?.symmetric_key = Some(*key);
        Ok(())
    }

    fn touch(&self, id: &ClientId, at: DateTime<Utc>) -> Result<()> {
        self.inner.write().client_mut(id)?.last_seen = at;
        Ok(())
    }

    fn file(&self, client_id: &ClientId, file_name: &str) -> Result<Option<FileRecord>> {
        Ok(self
            .inner
            .read()
            .files
            .get(&file_key(client_id, file_name))
            .cloned())
    }

    fn insert_file(&self, record: &FileRecord) -> Result<bool> {
        let mut inner = self.inner.write();
        if !inner.clients.contains_key(&record.client_id) {
            return Err(StorageError::ClientNotFound(record.client_id));
        }
        let key = file_key(&record.client_id, &record.file_name);
        if inner.files.contains_key(&key) {
            return Ok(false);
        }
        inner.files.insert(key, record.clone());
        Ok(true)
    }

    fn set_verified(&self, client_id: &ClientId, file_name: &str, verified: bool) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.files.get_mut(&file_key(client_id, file_name)) {
            Some(record) => {
                record.verified = verified;
                Ok(())
            }
            None => Err(StorageError::FileNotFound {
                client_id: *client_id,
                file_name: file_name.to_string(),
            }),
        }
    }

    fn remove_file(&self, client_id: &ClientId, file_name: &str) -> Result<FileRecord> {
        self.inner
            .write()
            .files
            .remove(&file_key(client_id, file_name))
            .ok_or_else(|| StorageError::FileNotFound {
                client_id: *client_id,
                file_name: file_name.to_string(),
            })
    }

    fn client_count(&self) -> Result<usize> {
        Ok(self.inner.read().clients.len())
    }
}
