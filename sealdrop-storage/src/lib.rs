//! # sealdrop-storage
//!
//! Storage layer for sealdrop.
//!
//! This crate provides:
//! - The [`ClientRegistry`] contract for client and file metadata
//! - A SQLite implementation and an in-memory implementation
//! - [`FileStore`] for uploaded file bytes

pub mod error;
pub mod files;
pub mod memory;
pub mod registry;
pub mod sqlite;

pub use error::StorageError;
pub use files::FileStore;
pub use memory::MemoryRegistry;
pub use registry::{ClientRecord, ClientRegistry, FileRecord};
pub use sqlite::SqliteRegistry;
