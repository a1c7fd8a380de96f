//! Device driver boundary.
//!
//! [`Locator`] finds a brick; [`Brick`] is one open session with it. The
//! bridge is generic over both so tests can swap in a fake.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::motor::MotorPort;
use crate::protocol::{
    InputValues, OutputState, OutputStatus, Protocol, SensorMode, SensorType, Transport,
};
use crate::sensor::SensorPort;
use crate::serial::{detect_device, SerialPort};
use crate::usb::UsbPort;

/// An open session with a brick. Every call may fail with a [`DeviceError`].
pub trait Brick: Send + Sync + 'static {
    fn set_output_state(
        &self,
        port: MotorPort,
        state: OutputState,
    ) -> impl Future<Output = DeviceResult<()>> + Send;

    fn get_output_state(
        &self,
        port: MotorPort,
    ) -> impl Future<Output = DeviceResult<OutputStatus>> + Send;

    fn reset_motor_position(
        &self,
        port: MotorPort,
        relative: bool,
    ) -> impl Future<Output = DeviceResult<()>> + Send;

    fn set_input_mode(
        &self,
        port: SensorPort,
        kind: SensorType,
        mode: SensorMode,
    ) -> impl Future<Output = DeviceResult<()>> + Send;

    fn get_input_values(
        &self,
        port: SensorPort,
    ) -> impl Future<Output = DeviceResult<InputValues>> + Send;

    fn ls_write(
        &self,
        port: SensorPort,
        tx: &[u8],
        rx_len: u8,
    ) -> impl Future<Output = DeviceResult<()>> + Send;

    fn ls_get_status(&self, port: SensorPort) -> impl Future<Output = DeviceResult<u8>> + Send;

    fn ls_read(&self, port: SensorPort) -> impl Future<Output = DeviceResult<Vec<u8>>> + Send;

    /// Battery voltage in millivolts.
    fn battery_level(&self) -> impl Future<Output = DeviceResult<u16>> + Send;

    /// Start a tone; returns once the brick accepted it, not when it ends.
    fn play_tone(
        &self,
        frequency_hz: u16,
        duration_ms: u16,
    ) -> impl Future<Output = DeviceResult<()>> + Send;
}

/// Brick discovery.
pub trait Locator: Send + Sync + 'static {
    type Brick: Brick;

    /// Find and open one brick. Failing to find one is normal.
    fn find_one(&self) -> impl Future<Output = DeviceResult<Self::Brick>> + Send;
}

/// A brick reached over USB or a serial link.
pub struct NxtBrick {
    protocol: Mutex<Protocol>,
}

impl Brick for NxtBrick {
    async fn set_output_state(&self, port: MotorPort, state: OutputState) -> DeviceResult<()> {
        self.protocol.lock().await.set_output_state(port, &state).await
    }

    async fn get_output_state(&self, port: MotorPort) -> DeviceResult<OutputStatus> {
        self.protocol.lock().await.get_output_state(port).await
    }

    async fn reset_motor_position(&self, port: MotorPort, relative: bool) -> DeviceResult<()> {
        self.protocol.lock().await.reset_motor_position(port, relative).await
    }

    async fn set_input_mode(
        &self,
        port: SensorPort,
        kind: SensorType,
        mode: SensorMode,
    ) -> DeviceResult<()> {
        self.protocol.lock().await.set_input_mode(port, kind, mode).await
    }

    async fn get_input_values(&self, port: SensorPort) -> DeviceResult<InputValues> {
        self.protocol.lock().await.get_input_values(port).await
    }

    async fn ls_write(&self, port: SensorPort, tx: &[u8], rx_len: u8) -> DeviceResult<()> {
        self.protocol.lock().await.ls_write(port, tx, rx_len).await
    }

    async fn ls_get_status(&self, port: SensorPort) -> DeviceResult<u8> {
        self.protocol.lock().await.ls_get_status(port).await
    }

    async fn ls_read(&self, port: SensorPort) -> DeviceResult<Vec<u8>> {
        self.protocol.lock().await.ls_read(port).await
    }

    async fn battery_level(&self) -> DeviceResult<u16> {
        self.protocol.lock().await.get_battery_level().await
    }

    async fn play_tone(&self, frequency_hz: u16, duration_ms: u16) -> DeviceResult<()> {
        self.protocol.lock().await.play_tone(frequency_hz, duration_ms).await
    }
}

/// Where a locator looks for a brick.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Search {
    /// Only the configured serial port
    Port(String),
    /// A brick on USB, else an auto-detected serial port
    UsbThenDetect,
    /// An auto-detected serial port
    Detect,
}

/// Finds a brick on the configured serial port, or on USB or an
/// auto-detected Bluetooth port.
pub struct BrickLocator {
    port: Option<String>,
    baud: u32,
    usb: bool,
    reply_timeout: Duration,
}

impl BrickLocator {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            port: config.port.clone(),
            baud: config.baud,
            usb: config.usb,
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
        }
    }

    fn search(&self) -> Search {
        match &self.port {
            Some(port) => Search::Port(port.clone()),
            None if self.usb => Search::UsbThenDetect,
            None => Search::Detect,
        }
    }

    async fn open_serial(&self, port_name: String) -> DeviceResult<(String, Transport)> {
        let serial = SerialPort::open(&port_name, self.baud, self.reply_timeout).await?;
        Ok((port_name, Transport::Serial(serial)))
    }

    /// Open the first link that might lead to a brick.
    async fn open(&self) -> DeviceResult<(String, Transport)> {
        match self.search() {
            Search::Port(port_name) => return self.open_serial(port_name).await,
            Search::UsbThenDetect => match UsbPort::open_first(self.reply_timeout) {
                Ok(Some(usb)) => return Ok(("USB".to_string(), Transport::Usb(usb))),
                Ok(None) => {}
                Err(e) => tracing::debug!("USB brick unavailable: {}", e),
            },
            Search::Detect => {}
        }

        let port_name = detect_device()?.ok_or(DeviceError::NotFound)?;
        self.open_serial(port_name).await
    }
}

impl Locator for BrickLocator {
    type Brick = NxtBrick;

    async fn find_one(&self) -> DeviceResult<NxtBrick> {
        let (link, transport) = self.open().await?;
        let mut protocol = Protocol::new(transport);

        // Anything that answers a battery query is a brick
        let millivolts = protocol.get_battery_level().await?;
        tracing::debug!("Brick on {} answered, battery {} mV", link, millivolts);

        Ok(NxtBrick {
            protocol: Mutex::new(protocol),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_port_skips_usb() {
        let config = DeviceConfig {
            port: Some("/dev/rfcomm0".into()),
            ..DeviceConfig::default()
        };
        let locator = BrickLocator::new(&config);
        assert_eq!(locator.search(), Search::Port("/dev/rfcomm0".into()));
    }

    #[test]
    fn test_usb_is_tried_before_detection() {
        let locator = BrickLocator::new(&DeviceConfig::default());
        assert_eq!(locator.search(), Search::UsbThenDetect);

        let config = DeviceConfig {
            usb: false,
            ..DeviceConfig::default()
        };
        assert_eq!(BrickLocator::new(&config).search(), Search::Detect);
    }

    #[tokio::test]
    async fn test_missing_configured_port_is_an_error() {
        let config = DeviceConfig {
            port: Some("/dev/nxt-bridge-does-not-exist".into()),
            ..DeviceConfig::default()
        };
        let result = BrickLocator::new(&config).find_one().await;
        assert!(matches!(result, Err(DeviceError::Serial(_)) | Err(DeviceError::Io(_))));
    }
}
