//! Serial port transport layer.
//!
//! Handles the Bluetooth SPP link to an NXT brick. Every telegram is framed
//! with a 2-byte little-endian length prefix, the same framing the brick uses
//! on its Bluetooth channel.

use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;

use crate::error::{DeviceError, DeviceResult};

/// Largest telegram the brick will send or accept.
pub const MAX_TELEGRAM: usize = 64;

/// Prefix a telegram with its length.
fn encode_frame(telegram: &[u8]) -> Vec<u8> {
    let len = telegram.len() as u16;
    let mut frame = Vec::with_capacity(telegram.len() + 2);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(telegram);
    frame
}

/// Pull one complete telegram off the front of `buf`, if present.
fn take_frame(buf: &mut Vec<u8>) -> DeviceResult<Option<Vec<u8>>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if len == 0 || len > MAX_TELEGRAM {
        buf.clear();
        return Err(DeviceError::Malformed(format!("bad frame length {len}")));
    }
    if buf.len() < len + 2 {
        return Ok(None);
    }
    let frame: Vec<u8> = buf.drain(..len + 2).skip(2).collect();
    Ok(Some(frame))
}

/// Serial port connection.
pub struct SerialPort {
    port: tokio_serial::SerialStream,
    read_buf: Vec<u8>,
    reply_timeout: Duration,
}

impl SerialPort {
    /// Open a serial port connection.
    pub async fn open(
        port_name: &str,
        baud_rate: u32,
        reply_timeout: Duration,
    ) -> DeviceResult<Self> {
        let port = tokio_serial::new(port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open_native_async()?;

        // Bluetooth SPP links need a moment before the first telegram
        tokio::time::sleep(Duration::from_millis(50)).await;

        tracing::debug!("Opened {} at {} baud", port_name, baud_rate);

        Ok(Self {
            port,
            read_buf: Vec::with_capacity(256),
            reply_timeout,
        })
    }

    /// Write one framed telegram.
    pub async fn write_frame(&mut self, telegram: &[u8]) -> DeviceResult<()> {
        use tokio::io::AsyncWriteExt;

        tracing::trace!("TX {}", hex::encode(telegram));
        self.port.write_all(&encode_frame(telegram)).await?;
        self.port.flush().await?;
        Ok(())
    }

    /// Read one framed telegram (blocking until complete).
    pub async fn read_frame(&mut self) -> DeviceResult<Vec<u8>> {
        use tokio::io::AsyncReadExt;

        loop {
            if let Some(frame) = take_frame(&mut self.read_buf)? {
                tracing::trace!("RX {}", hex::encode(&frame));
                return Ok(frame);
            }

            let mut tmp = [0u8; 128];
            let n = self.port.read(&mut tmp).await?;
            if n == 0 {
                return Err(DeviceError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            self.read_buf.extend_from_slice(&tmp[..n]);
        }
    }

    /// Read one framed telegram within the reply timeout.
    pub async fn read_frame_timeout(&mut self) -> DeviceResult<Vec<u8>> {
        match tokio::time::timeout(self.reply_timeout, self.read_frame()).await {
            Ok(result) => result,
            Err(_) => {
                // A late reply would desync the next exchange
                self.read_buf.clear();
                Err(DeviceError::Timeout)
            }
        }
    }
}

/// Whether a port looks like an NXT link.
fn is_nxt_port(port: &serialport::SerialPortInfo) -> bool {
    match &port.port_type {
        serialport::SerialPortType::BluetoothPort => true,
        // The brick's USB side is not a serial device
        serialport::SerialPortType::UsbPort(_) => false,
        _ => {
            let name = port.port_name.to_ascii_lowercase();
            name.contains("rfcomm") || name.contains("nxt")
        }
    }
}

/// Auto-detect a serial port that is likely connected to a brick.
pub fn detect_device() -> DeviceResult<Option<String>> {
    let ports = serialport::available_ports()?;

    Ok(ports.into_iter().find(is_nxt_port).map(|p| p.port_name))
}
