//! On-disk file bytes, one directory per client.

use crate::error::{Result, StorageError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Stores uploaded files under `<root>/<client name>/<file name>`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates the store, creating `root` if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory for `client_name`, creating it if absent.
    pub fn client_dir(&self, client_name: &str) -> Result<PathBuf> {
        validate_component(client_name)?;
        let dir = self.root.join(client_name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Writes `bytes`, replacing any previous content. Returns the path.
    pub fn write(&self, client_name: &str, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        validate_component(file_name)?;
        let path = self.client_dir(client_name)?.join(file_name);
        fs::write(&path, bytes)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
        Ok(path)
    }

    /// Deletes a stored file. Returns false if it was already gone.
    pub fn remove(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Rejects names that would escape their parent directory.
fn validate_component(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StorageError::InvalidPathComponent(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_overwrite_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("files")).unwrap();

        let path = store.write("alice", "notes.txt", b"first").unwrap();
        assert_eq!(path, dir.path().join("files").join("alice").join("notes.txt"));
        assert_eq!(fs::read(&path).unwrap(), b"first");

        let again = store.write("alice", "notes.txt", b"second version").unwrap();
        assert_eq!(again, path);
        assert_eq!(fs::read(&path).unwrap(), b"second version");

        assert!(store.remove(&path).unwrap());
        assert!(!path.exists());
        assert!(!store.remove(&path).unwrap());
    }

    #[test]
    fn test_client_dir_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let first = store.client_dir("bob smith").unwrap();
        let second = store.client_dir("bob smith").unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[test]
    fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        for name in ["", ".", "..", "../etc", "a/b", "a\\b", "nul\0byte"] {
            assert!(
                matches!(
                    store.write("alice", name, b"x"),
                    Err(StorageError::InvalidPathComponent(_))
                ),
                "accepted {:?}",
                name
            );
        }
        assert!(store.write("..", "ok.txt", b"x").is_err());
        assert!(store.write("alice", "report.final.pdf", b"x").is_ok());
    }

    #[test]
    fn test_accepts_dots_inside_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        for name in ["x..y", "report..final.pdf", "v1..2.txt", "...", ".hidden"] {
            let path = store.write("alice", name, b"x").unwrap();
            assert_eq!(path, dir.path().join("alice").join(name));
            assert_eq!(fs::read(&path).unwrap(), b"x");
        }
    }
}
