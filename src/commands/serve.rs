//! Helper server command

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::bridge::Bridge;
use crate::brick::BrickLocator;
use crate::config::AppConfig;
use crate::host::Host;

/// Run the helper server until Ctrl-C
pub async fn cmd_serve(config: &AppConfig) -> Result<()> {
    let locator = BrickLocator::new(&config.device);
    let bridge = Arc::new(Bridge::new(locator, Duration::from_secs(config.liveness.idle_secs)));

    if !bridge.ensure_connected().await {
        tracing::info!("No brick yet; will keep looking while the editor polls");
    }

    let addr = format!("{}:{}", config.extension.bind, config.extension.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to listen on {addr}"))?;
    tracing::info!("{} helper listening on {}", config.extension.name, addr);

    let host = Arc::new(Host::new(bridge, &config.extension));

    tokio::select! {
        result = host.serve(listener) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}
