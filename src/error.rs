//! Device error types.
//!
//! Everything that can go wrong between the bridge and the brick ends up as a
//! [`DeviceError`]. The bridge never hands these to the host; the guarded
//! execution path matches on them and drops the connection instead.

/// Result type for brick operations.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors raised by the device driver boundary.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// I/O error on the underlying link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// USB bulk transfer error
    #[error("USB transfer error: {0}")]
    Usb(#[from] nusb::transfer::TransferError),

    /// No reply within the configured timeout
    #[error("Reply timeout")]
    Timeout,

    /// Brick answered with a non-zero status byte
    #[error("Brick rejected opcode {opcode:#04x} with status {code:#04x}")]
    Status {
        /// Opcode of the rejected command
        opcode: u8,
        /// Status byte from the reply telegram
        code: u8,
    },

    /// Reply that could not be decoded
    #[error("Malformed reply: {0}")]
    Malformed(String),

    /// Discovery found no brick
    #[error("No brick found")]
    NotFound,

    /// Low-speed (I2C) sensor never produced data
    #[error("Sensor bus timeout on port {0}")]
    BusTimeout(u8),
}

impl DeviceError {
    /// Whether the error means the link itself is gone, as opposed to the
    /// brick refusing a single command.
    pub fn is_link_loss(&self) -> bool {
        matches!(
            self,
            DeviceError::Io(_)
                | DeviceError::Serial(_)
                | DeviceError::Usb(_)
                | DeviceError::Timeout
                | DeviceError::NotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_loss_classification() {
        assert!(DeviceError::Timeout.is_link_loss());
        assert!(DeviceError::Usb(nusb::transfer::TransferError::Disconnected).is_link_loss());
        let broken = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(DeviceError::Io(broken).is_link_loss());
        assert!(!DeviceError::Status { opcode: 0x07, code: 0xC0 }.is_link_loss());
        assert!(!DeviceError::BusTimeout(2).is_link_loss());
    }

    #[test]
    fn test_status_message() {
        let err = DeviceError::Status { opcode: 0x04, code: 0x20 };
        assert_eq!(err.to_string(), "Brick rejected opcode 0x04 with status 0x20");
    }
}
