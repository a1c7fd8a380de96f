//! nxt-bridge - Scratch helper for LEGO Mindstorms NXT bricks.
//!
//! Serves the block editor's helper protocol on a local port and drives a
//! brick over USB or Bluetooth, reconnecting whenever it comes back.

mod blocks;
mod brick;
mod bridge;
mod cli;
mod commands;
mod config;
mod error;
mod host;
mod motor;
mod protocol;
mod sensor;
mod serial;
mod usb;

#[cfg(test)]
mod fake;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, Commands};
use commands::{cmd_descriptor, cmd_list_ports, cmd_serve, cmd_status};
use config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over -v
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    match cli.command {
        Commands::Serve { .. } => {
            cmd_serve(&config).await?;
        }
        Commands::Ports => {
            cmd_list_ports()?;
        }
        Commands::Descriptor => {
            cmd_descriptor(&config)?;
        }
        Commands::Status => {
            cmd_status(&config).await?;
        }
    }

    Ok(())
}
