//! USB transport layer.
//!
//! Over USB the brick is a vendor-class device, not a serial port. Telegrams
//! travel unframed on a pair of bulk endpoints, one telegram per transfer.

use std::time::Duration;

use nusb::transfer::RequestBuffer;

use crate::error::{DeviceError, DeviceResult};
use crate::serial::MAX_TELEGRAM;

/// LEGO Group vendor id
pub const LEGO_VID: u16 = 0x0694;
/// NXT brick product id
pub const NXT_PID: u16 = 0x0002;

const INTERFACE: u8 = 0;
const EP_OUT: u8 = 0x01;
const EP_IN: u8 = 0x82;

fn is_nxt_ids(vid: u16, pid: u16) -> bool {
    vid == LEGO_VID && pid == NXT_PID
}

/// NXT bricks currently on the bus.
pub fn list_bricks() -> DeviceResult<Vec<nusb::DeviceInfo>> {
    Ok(nusb::list_devices()?
        .filter(|info| is_nxt_ids(info.vendor_id(), info.product_id()))
        .collect())
}

/// Bulk-endpoint connection to a brick.
pub struct UsbPort {
    interface: nusb::Interface,
    reply_timeout: Duration,
}

impl UsbPort {
    /// Claim the first brick on the bus, if there is one.
    pub fn open_first(reply_timeout: Duration) -> DeviceResult<Option<Self>> {
        let Some(info) = list_bricks()?.into_iter().next() else {
            return Ok(None);
        };

        let device = info.open()?;
        let interface = device.claim_interface(INTERFACE)?;
        tracing::debug!(
            "Opened USB brick on bus {} address {}",
            info.bus_number(),
            info.device_address()
        );

        Ok(Some(Self {
            interface,
            reply_timeout,
        }))
    }

    /// Send one telegram.
    pub async fn write_frame(&mut self, telegram: &[u8]) -> DeviceResult<()> {
        check_telegram(telegram)?;
        tracing::trace!("TX {}", hex::encode(telegram));

        let transfer = self.interface.bulk_out(EP_OUT, telegram.to_vec());
        match tokio::time::timeout(self.reply_timeout, transfer).await {
            Ok(completion) => {
                completion.into_result()?;
                Ok(())
            }
            Err(_) => Err(DeviceError::Timeout),
        }
    }

    /// Receive one telegram within the reply timeout.
    pub async fn read_frame_timeout(&mut self) -> DeviceResult<Vec<u8>> {
        let transfer = self.interface.bulk_in(EP_IN, RequestBuffer::new(MAX_TELEGRAM));
        let frame = match tokio::time::timeout(self.reply_timeout, transfer).await {
            Ok(completion) => completion.into_result()?,
            Err(_) => return Err(DeviceError::Timeout),
        };
        if frame.is_empty() {
            return Err(DeviceError::Malformed("empty USB transfer".into()));
        }

        tracing::trace!("RX {}", hex::encode(&frame));
        Ok(frame)
    }
}

fn check_telegram(telegram: &[u8]) -> DeviceResult<()> {
    if telegram.is_empty() || telegram.len() > MAX_TELEGRAM {
        return Err(DeviceError::Malformed(format!("bad telegram length {}", telegram.len())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_the_nxt_product_matches() {
        assert!(is_nxt_ids(0x0694, 0x0002));
        // Same vendor, other products (RCX tower, EV3)
        assert!(!is_nxt_ids(0x0694, 0x0001));
        assert!(!is_nxt_ids(0x0694, 0x0005));
        assert!(!is_nxt_ids(0x03eb, 0x0002));
    }

    #[test]
    fn test_telegram_length_limits() {
        assert!(check_telegram(&[0x00, 0x0B]).is_ok());
        assert!(check_telegram(&[0u8; MAX_TELEGRAM]).is_ok());
        assert!(matches!(check_telegram(&[]), Err(DeviceError::Malformed(_))));
        assert!(matches!(
            check_telegram(&[0u8; MAX_TELEGRAM + 1]),
            Err(DeviceError::Malformed(_))
        ));
    }

    #[test]
    fn test_list_bricks_no_panic() {
        // Should not panic even without a USB bus
        let _ = list_bricks();
    }
}
