//! Brick status command

use anyhow::Result;

use crate::brick::{Brick, Locator, BrickLocator};
use crate::config::AppConfig;
use crate::error::DeviceError;

/// Find a brick once and show its battery level
pub async fn cmd_status(config: &AppConfig) -> Result<()> {
    let locator = BrickLocator::new(&config.device);

    let brick = match locator.find_one().await {
        Ok(brick) => brick,
        Err(DeviceError::NotFound) => {
            println!("No brick found.");
            println!("Pair it over Bluetooth or plug in USB, or pass -p <port>.");
            println!("'nxt-bridge ports' lists candidates.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let millivolts = brick.battery_level().await?;

    println!("Brick Status:");
    println!("  Port:     {}", config.device.port.as_deref().unwrap_or("auto-detected"));
    println!("  Battery:  {:.2} V ({} mV)", f64::from(millivolts) / 1000.0, millivolts);

    Ok(())
}
