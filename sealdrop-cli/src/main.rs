//! sealdrop-cli - Command-line client for sealdrop
//!
//! Registers with a server and sends files over the encrypted upload
//! protocol.

mod commands;
mod identity;

use clap::{Parser, Subcommand};
use colored::Colorize;
use identity::DEFAULT_IDENTITY_FILE;
use sealdrop_client::{Client, ConnectionConfig, DEFAULT_MAX_ATTEMPTS};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sealdrop-cli")]
#[command(about = "Command-line client for the sealdrop file drop server")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, env = "SEALDROP_SERVER", default_value = "127.0.0.1:1234")]
    server: SocketAddr,

    /// Identity file written by `register`
    #[arg(short, long, env = "SEALDROP_IDENTITY", default_value = DEFAULT_IDENTITY_FILE)]
    identity: PathBuf,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Uploads per file before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    attempts: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a username and save the identity file
    Register {
        /// Username (letters, digits and spaces)
        name: String,

        /// Replace an existing identity file
        #[arg(long)]
        force: bool,
    },

    /// Send a file
    Send {
        /// File to send
        path: PathBuf,

        /// Name to store the file under (defaults to the file's name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Print the cksum of a local file
    Checksum {
        /// File to checksum
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Handle checksum locally (no server connection needed)
    if let Commands::Checksum { path } = &cli.command {
        match commands::local_checksum(path) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = ConnectionConfig::new(cli.server)
        .with_request_timeout(Duration::from_secs(cli.timeout));
    let client = Client::new(config).with_max_attempts(cli.attempts);

    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;
    tracing::debug!("Connected to {}", cli.server);

    match commands::execute(&client, &cli.identity, cli.command).await {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    client.close().await?;
    Ok(())
}
