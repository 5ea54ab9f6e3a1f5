//! # tether
//!
//! Runs the Tether notification server or the interactive client shell.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tether_client::{ClientConfig, ConnectionManager, Shell, run_shell};
use tether_server::TetherServer;
use tether_settings::TetherSettings;
use tokio::io::BufReader;

/// Tether notification server and shell client.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "Tether notification server and shell client")]
struct Cli {
    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server until ctrl-c.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Start the interactive client shell.
    Shell {
        /// Server host (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Server port (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
}

fn load(path: Option<&PathBuf>) -> Result<TetherSettings> {
    let settings = match path {
        Some(path) => tether_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => tether_settings::load_settings().context("Failed to load settings")?,
    };
    Ok(settings)
}

async fn serve(mut settings: TetherSettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    let handle = TetherServer::from_settings(&settings.server)
        .bind()
        .await
        .context("Failed to bind server")?;
    tracing::info!(addr = %handle.local_addr(), "Tether server listening on {}", handle.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    handle.shutdown().await;
    Ok(())
}

async fn shell(mut settings: TetherSettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        settings.client.host = host;
    }
    if let Some(port) = port {
        settings.client.port = port;
    }
    let config = ClientConfig::from_settings(&settings.client);
    let shell = Shell::new(
        Arc::new(ConnectionManager::new(config.clone())),
        config.host,
        config.port,
    );
    run_shell(&shell, BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .context("Shell input failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(cli.config.as_ref())?;
    tether_logging::init_logging(&settings.logging);

    match cli.command {
        Command::Serve { host, port } => serve(settings, host, port).await,
        Command::Shell { host, port } => shell(settings, host, port).await,
    }
}
