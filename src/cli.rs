//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "nxt-bridge")]
#[command(author, version, about = "Scratch helper for LEGO Mindstorms NXT bricks", long_about = None)]
pub struct Cli {
    /// Serial port of the brick (e.g., /dev/rfcomm0, /dev/ttyACM0 or COM5); auto-detected if omitted
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// Do not look for a brick on USB
    #[arg(long, global = true)]
    pub no_usb: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded file.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = &self.port {
            config.device.port = Some(port.clone());
        }
        if let Some(baud) = self.baud {
            config.device.baud = baud;
        }
        if self.no_usb {
            config.device.usb = false;
        }
        if let Commands::Serve { listen: Some(port) } = self.command {
            config.extension.port = port;
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the helper server the block editor connects to
    Serve {
        /// Port to listen on (default 1330)
        #[arg(short, long)]
        listen: Option<u16>,
    },

    /// List USB bricks and serial ports
    Ports,

    /// Print the extension descriptor JSON
    Descriptor,

    /// Look for a brick once and report its battery level
    Status,
}
