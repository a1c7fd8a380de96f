//! Utility commands

use anyhow::Result;

use crate::blocks;
use crate::config::AppConfig;
use crate::usb;

/// List USB bricks and available serial ports
pub fn cmd_list_ports() -> Result<()> {
    println!("NXT bricks on USB:\n");

    let bricks = usb::list_bricks().unwrap_or_else(|e| {
        tracing::warn!("Cannot list USB devices: {}", e);
        Vec::new()
    });
    if bricks.is_empty() {
        println!("  None found");
    }
    for info in bricks {
        print!("  bus {} address {}", info.bus_number(), info.device_address());
        if let Some(serial) = info.serial_number() {
            print!(" ({serial})");
        }
        println!();
    }

    println!("\nAvailable serial ports:\n");

    let ports = serialport::available_ports()?;

    if ports.is_empty() {
        println!("  No serial ports found");
        return Ok(());
    }

    for port in ports {
        print!("  {} ", port.port_name);

        match port.port_type {
            serialport::SerialPortType::UsbPort(info) => {
                print!("(USB {:04x}:{:04x}", info.vid, info.pid);
                if let Some(product) = info.product {
                    print!(" {product}");
                }
                print!(")");
            }
            serialport::SerialPortType::BluetoothPort => print!("(Bluetooth)"),
            _ => {}
        }

        println!();
    }

    Ok(())
}

/// Print the extension descriptor the block editor imports
pub fn cmd_descriptor(config: &AppConfig) -> Result<()> {
    let descriptor = blocks::descriptor(&config.extension.name, config.extension.port);
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}
