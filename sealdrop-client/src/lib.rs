//! # sealdrop-client
//!
//! Client library for sealdrop.
//!
//! This crate provides:
//! - Async TCP connection with request timeouts
//! - High-level API for registration, key exchange and uploads
//! - Checksum-confirmed file delivery with bounded retries

pub mod client;
pub mod connection;
pub mod error;

pub use client::{Client, Delivery, FileReceipt, DEFAULT_MAX_ATTEMPTS};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
