//! SQLite-backed registry.

use crate::error::{Result, StorageError};
use crate::registry::{ClientRecord, ClientRegistry, FileRecord};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sealdrop_protocol::{ClientId, PublicKeyBytes, PUBLIC_KEY_SIZE, SYMMETRIC_KEY_SIZE};
use std::path::{Path, PathBuf};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS clients (
    id          TEXT PRIMARY KEY NOT NULL,   -- hex-encoded 16-byte id
    name        TEXT NOT NULL UNIQUE,
    public_key  BLOB,                        -- 160-byte SubjectPublicKeyInfo
    aes_key     BLOB,                        -- 16-byte session key
    last_seen   TEXT NOT NULL                -- RFC-3339
);

CREATE TABLE IF NOT EXISTS files (
    client_id   TEXT NOT NULL,
    file_name   TEXT NOT NULL,
    path        TEXT NOT NULL,
    verified    INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (client_id, file_name),
    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE
);
"#;

const CLIENT_COLUMNS: &str = "id, name, public_key, aes_key, last_seen";

/// Registry stored in a SQLite database.
///
/// All calls go through one connection behind a mutex, so each trait
/// method runs to completion before the next begins.
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(path = %path.display(), "opening registry database");
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn update_client(&self, id: &ClientId, sql: &str, value: &dyn rusqlite::ToSql) -> Result<()> {
        let affected = self.conn.lock().execute(sql, params![value, id.to_hex()])?;
        if affected == 0 {
            return Err(StorageError::ClientNotFound(*id));
        }
        Ok(())
    }
}

impl ClientRegistry for SqliteRegistry {
    fn client_by_id(&self, id: &ClientId) -> Result<Option<ClientRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {} FROM clients WHERE id = ?1", CLIENT_COLUMNS),
                params![id.to_hex()],
                row_to_client,
            )
            .optional()?;
        Ok(record)
    }

    fn client_by_name(&self, name: &str) -> Result<Option<ClientRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {} FROM clients WHERE name = ?1", CLIENT_COLUMNS),
                params![name],
                row_to_client,
            )
            .optional()?;
        Ok(record)
    }

    fn insert_client(&self, record: &ClientRecord) -> Result<()> {
        let conn = self.conn.lock();
        let id_taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM clients WHERE id = ?1)",
            params![record.id.to_hex()],
            |row| row.get(0),
        )?;
        if id_taken {
            return Err(StorageError::DuplicateId(record.id));
        }

        let result = conn.execute(
            "INSERT INTO clients (id, name, public_key, aes_key, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_hex(),
                record.name,
                record.public_key.as_ref().map(|k| k.to_vec()),
                record.symmetric_key.as_ref().map(|k| k.to_vec()),
                record.last_seen.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::DuplicateName(record.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_public_key(&self, id: &ClientId, key: &PublicKeyBytes) -> Result<()> {
        self.update_client(
            id,
            "UPDATE clients SET public_key = ?1 WHERE id = ?2",
            &key.to_vec(),
        )
    }

    fn set_symmetric_key(&self, id: &ClientId, key: &[u8; SYMMETRIC_KEY_SIZE]) -> Result<()> {
        self.update_client(
            id,
            "UPDATE clients SET aes_key = ?1 WHERE id = ?2",
            &key.to_vec(),
        )
    }

    fn touch(&self, id: &ClientId, at: DateTime<Utc>) -> Result<()> {
        self.update_client(
            id,
            "UPDATE clients SET last_seen = ?1 WHERE id = ?2",
            &at.to_rfc3339(),
        )
    }

    fn file(&self, client_id: &ClientId, file_name: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT client_id, file_name, path, verified FROM files
                 WHERE client_id = ?1 AND file_name = ?2",
                params![client_id.to_hex(), file_name],
                row_to_file,
            )
            .optional()?;
        Ok(record)
    }

    fn insert_file(&self, record: &FileRecord) -> Result<bool> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT OR IGNORE INTO files (client_id, file_name, path, verified)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.client_id.to_hex(),
                record.file_name,
                record.path.to_string_lossy().into_owned(),
                record.verified,
            ],
        );
        match result {
            Ok(affected) => Ok(affected > 0),
            // Foreign key failure: no such client
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::ClientNotFound(record.client_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_verified(&self, client_id: &ClientId, file_name: &str, verified: bool) -> Result<()> {
        let affected = self.conn.lock().execute(
            "UPDATE files SET verified = ?1 WHERE client_id = ?2 AND file_name = ?3",
            params![verified, client_id.to_hex(), file_name],
        )?;
        if affected == 0 {
            return Err(StorageError::FileNotFound {
                client_id: *client_id,
                file_name: file_name.to_string(),
            });
        }
        Ok(())
    }

    fn remove_file(&self, client_id: &ClientId, file_name: &str) -> Result<FileRecord> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT client_id, file_name, path, verified FROM files
                 WHERE client_id = ?1 AND file_name = ?2",
                params![client_id.to_hex(), file_name],
                row_to_file,
            )
            .optional()?
            .ok_or_else(|| StorageError::FileNotFound {
                client_id: *client_id,
                file_name: file_name.to_string(),
            })?;
        conn.execute(
            "DELETE FROM files WHERE client_id = ?1 AND file_name = ?2",
            params![client_id.to_hex(), file_name],
        )?;
        Ok(record)
    }

    fn client_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_client_id(column: usize, hex: &str) -> rusqlite::Result<ClientId> {
    ClientId::from_hex(hex).ok_or_else(|| {
        conversion_error(
            column,
            StorageError::Corruption(format!("bad client id {:?}", hex)),
        )
    })
}

fn fixed_blob<const N: usize>(
    column: usize,
    blob: Option<Vec<u8>>,
) -> rusqlite::Result<Option<[u8; N]>> {
    blob.map(|bytes| {
        let len = bytes.len();
        <[u8; N]>::try_from(bytes).map_err(|_| {
            conversion_error(
                column,
                StorageError::Corruption(format!("expected {} bytes, found {}", N, len)),
            )
        })
    })
    .transpose()
}

fn row_to_client(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClientRecord> {
    let id_hex: String = row.get(0)?;
    let name: String = row.get(1)?;
    let public_key: Option<Vec<u8>> = row.get(2)?;
    let aes_key: Option<Vec<u8>> = row.get(3)?;
    let last_seen_str: String = row.get(4)?;

    let last_seen = DateTime::parse_from_rfc3339(&last_seen_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(4, e))?;

    Ok(ClientRecord {
        id: parse_client_id(0, &id_hex)?,
        name,
        public_key: fixed_blob::<PUBLIC_KEY_SIZE>(2, public_key)?,
        symmetric_key: fixed_blob::<SYMMETRIC_KEY_SIZE>(3, aes_key)?,
        last_seen,
    })
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let id_hex: String = row.get(0)?;
    let path: String = row.get(2)?;
    Ok(FileRecord {
        client_id: parse_client_id(0, &id_hex)?,
        file_name: row.get(1)?,
        path: PathBuf::from(path),
        verified: row.get(3)?,
    })
}
