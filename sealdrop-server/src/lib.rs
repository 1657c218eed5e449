//! # sealdrop-server
//!
//! TCP server for sealdrop.
//!
//! This crate provides:
//! - TCP connection handling with async I/O, one task per connection
//! - Request framing and dispatch
//! - Per-connection session state
//! - Handlers for registration, key exchange, uploads and checksum reports
//! - Configuration loading and Prometheus metrics

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod server;
pub mod session;

pub use config::{Config, MetricsConfig, NetworkConfig, ProtocolConfig, StorageBackend, StorageConfig};
pub use connection::Connection;
pub use error::{ErrorKind, ServerError};
pub use handler::RequestHandler;
pub use metrics::{run_metrics_server, Metrics};
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{Session, SessionState};
