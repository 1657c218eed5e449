//! Command execution.

use crate::identity::Identity;
use crate::Commands;
use colored::Colorize;
use sealdrop_client::Client;
use sealdrop_crypto::{checksum, ClientKeyPair};
use std::path::Path;

/// Executes a command that needs the server and returns the formatted output.
pub async fn execute(
    client: &Client,
    identity_path: &Path,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Checksum { .. } => unreachable!(),

        Commands::Register { name, force } => {
            if identity_path.exists() && !force {
                return Err(format!(
                    "{} already exists (use --force to replace it)",
                    identity_path.display()
                )
                .into());
            }

            let key_pair = ClientKeyPair::generate()?;
            let client_id = client.register(&name).await?;
            tracing::debug!("Registered {:?} as {}", name, client_id);
            let identity = Identity {
                name,
                client_id,
                key_pair,
            };
            identity.save(identity_path)?;

            Ok(format!(
                "{} {} as {} ({})",
                "Registered".green(),
                identity.name.cyan(),
                client_id,
                identity_path.display()
            ))
        }

        Commands::Send { path, name } => {
            let identity = Identity::load(identity_path)?;
            let file_name = match name {
                Some(name) => name,
                None => remote_name(&path)?,
            };
            let content = std::fs::read(&path)?;
            tracing::info!(
                "Sending {} as {:?} ({} bytes)",
                path.display(),
                file_name,
                content.len()
            );

            let key = client
                .exchange_keys(identity.client_id, &identity.name, &identity.key_pair)
                .await?;
            tracing::debug!("Key exchange complete for {}", identity.name);
            let delivery = client
                .send_file(identity.client_id, &key, &file_name, &content)
                .await?;
            tracing::debug!(
                "Delivery of {:?} finished after {} attempt(s), verified={}",
                file_name,
                delivery.attempts,
                delivery.verified
            );

            if delivery.verified {
                Ok(format!(
                    "{} {} ({} bytes, cksum {}, {} attempt(s))",
                    "Sent".green(),
                    file_name.cyan(),
                    content.len(),
                    checksum(&content),
                    delivery.attempts
                ))
            } else {
                Err(format!(
                    "checksum mismatch on every one of {} attempts; {} was dropped by the server",
                    delivery.attempts, file_name
                )
                .into())
            }
        }
    }
}

/// Checksums a local file, matching what the server reports.
pub fn local_checksum(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let content = std::fs::read(path)?;
    Ok(format!("{} {} {}", checksum(&content), content.len(), path.display()))
}

/// File name sent to the server: the last component of `path`.
fn remote_name(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| format!("{} has no usable file name", path.display()).into())
}
