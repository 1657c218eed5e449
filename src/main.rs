//! sealdrop - Encrypted file drop server
//!
//! Registered clients exchange an RSA public key for an AES session key and
//! upload encrypted files, each confirmed against a server-side cksum.

use sealdrop_server::{
    run_metrics_server, Config, Metrics, RequestHandler, Server, ServerConfig, StorageBackend,
};
use sealdrop_storage::{ClientRegistry, FileStore, MemoryRegistry, SqliteRegistry};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if SEALDROP_CONFIG is set, then env overrides)
    let config_path = std::env::var("SEALDROP_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let listen_addr = config.network.listen_addr();
    tracing::info!("Starting sealdrop server");
    tracing::info!("  Listen address: {}", listen_addr);
    tracing::info!("  Data directory: {}", config.storage.data_dir.display());
    tracing::info!("  Max payload: {} MB", config.protocol.max_payload_mb);
    match config.network.idle_timeout() {
        Some(timeout) => tracing::info!("  Idle timeout: {:?}", timeout),
        None => tracing::info!("  Idle timeout: disabled"),
    }

    // Open the registry
    let registry: Arc<dyn ClientRegistry> = match config.storage.backend {
        StorageBackend::Sqlite => {
            let path = config.storage.database_path();
            tracing::info!("  Registry: sqlite ({})", path.display());
            Arc::new(SqliteRegistry::open(&path)?)
        }
        StorageBackend::Memory => {
            tracing::warn!("  Registry: memory (nothing survives a restart)");
            Arc::new(MemoryRegistry::new())
        }
    };
    tracing::info!("  Registered clients: {}", registry.client_count()?);

    let files_dir = config.storage.files_dir();
    let files = FileStore::new(&files_dir)?;
    tracing::info!("  Files directory: {}", files_dir.display());

    let handler = RequestHandler::new(registry, files)
        .with_registration_failure_reply(config.protocol.reply_registration_failure);

    let mut server_config = ServerConfig::new(listen_addr);
    server_config.idle_timeout = config.network.idle_timeout();
    server_config.max_connections = config.network.max_connections;
    server_config.max_payload_size = config.protocol.max_payload_size();

    // Start the metrics endpoint if enabled
    let (metrics_shutdown, _) = broadcast::channel(1);
    let metrics_handle = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        server_config = server_config.with_metrics(metrics.clone());

        let addr = config.metrics.bind_addr;
        let shutdown_rx = metrics_shutdown.subscribe();
        tracing::info!("  Metrics: enabled ({})", addr);
        Some(tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown_rx).await {
                tracing::error!("Metrics server failed: {}", e);
            }
        }))
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let server = Arc::new(Server::new(server_config, handler));

    // Bind before spawning anything that waits on the server
    let listener = server.bind().await.map_err(|e| {
        tracing::error!("Failed to bind {}: {}", listen_addr, e);
        e
    })?;

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let shutdown_metrics = metrics_shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
        let _ = shutdown_metrics.send(());
    });

    // Run server (blocks until shutdown)
    server.serve(listener).await?;

    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    let stats = server.stats();
    tracing::info!(
        "Server stopped ({} connections, {} requests)",
        stats.connections_total.load(std::sync::atomic::Ordering::Relaxed),
        stats.requests_total.load(std::sync::atomic::Ordering::Relaxed)
    );
    Ok(())
}
