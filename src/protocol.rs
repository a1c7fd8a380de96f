//! NXT direct command protocol.
//!
//! ## Telegram Format
//!
//! Commands are sent as direct-command telegrams that request a reply:
//! ```text
//! 0x00 <opcode> [payload...]
//! ```
//!
//! Replies echo the opcode and carry a status byte:
//! ```text
//! 0x02 <opcode> <status> [payload...]
//! ```
//!
//! All multi-byte fields are little-endian.

use std::ops::BitOr;

use crate::error::{DeviceError, DeviceResult};
use crate::motor::MotorPort;
use crate::sensor::SensorPort;
use crate::serial::SerialPort;
use crate::usb::UsbPort;

const DIRECT_COMMAND: u8 = 0x00;
const REPLY: u8 = 0x02;

pub const PLAY_TONE: u8 = 0x03;
pub const SET_OUTPUT_STATE: u8 = 0x04;
pub const SET_INPUT_MODE: u8 = 0x05;
pub const GET_OUTPUT_STATE: u8 = 0x06;
pub const GET_INPUT_VALUES: u8 = 0x07;
pub const RESET_MOTOR_POSITION: u8 = 0x0A;
pub const GET_BATTERY_LEVEL: u8 = 0x0B;
pub const LS_GET_STATUS: u8 = 0x0E;
pub const LS_WRITE: u8 = 0x0F;
pub const LS_READ: u8 = 0x10;

/// Status byte the brick uses while a low-speed transaction is still running.
pub const STATUS_PENDING: u8 = 0x20;

/// Stale replies tolerated before giving up on an exchange.
const MAX_SKIP_FRAMES: usize = 4;

/// Output mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputMode(u8);

impl OutputMode {
    pub const MOTOR_ON: Self = Self(0x01);
    pub const BRAKE: Self = Self(0x02);
    pub const REGULATED: Self = Self(0x04);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OutputMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Motor regulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Regulation {
    #[default]
    Idle = 0x00,
    Speed = 0x01,
    Sync = 0x02,
}

/// Motor run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RunState {
    #[default]
    Idle = 0x00,
    RampUp = 0x10,
    Running = 0x20,
    RampDown = 0x40,
}

impl RunState {
    fn from_byte(b: u8) -> Self {
        match b {
            0x10 => RunState::RampUp,
            0x20 => RunState::Running,
            0x40 => RunState::RampDown,
            _ => RunState::Idle,
        }
    }
}

/// Sensor type codes understood by SETINPUTMODE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SensorType {
    Switch = 0x01,
    LightActive = 0x05,
    LightInactive = 0x06,
    SoundDba = 0x08,
    LowSpeed9V = 0x0B,
}

/// Sensor mode codes understood by SETINPUTMODE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SensorMode {
    Raw = 0x00,
    Boolean = 0x20,
}

/// Output state sent with SETOUTPUTSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputState {
    pub power: i8,
    pub mode: OutputMode,
    pub regulation: Regulation,
    pub turn_ratio: i8,
    pub run_state: RunState,
    /// Degrees to run before stopping; 0 runs forever
    pub tacho_limit: u32,
}

/// Output state reported by GETOUTPUTSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputStatus {
    pub state: OutputState,
    pub tacho_count: i32,
    pub block_tacho_count: i32,
    pub rotation_count: i32,
}

impl OutputStatus {
    /// Parse the payload following the status byte.
    pub fn parse(payload: &[u8]) -> DeviceResult<Self> {
        expect_len("GETOUTPUTSTATE", payload, 22)?;
        Ok(Self {
            state: OutputState {
                power: payload[1] as i8,
                mode: OutputMode(payload[2]),
                regulation: match payload[3] {
                    0x01 => Regulation::Speed,
                    0x02 => Regulation::Sync,
                    _ => Regulation::Idle,
                },
                turn_ratio: payload[4] as i8,
                run_state: RunState::from_byte(payload[5]),
                tacho_limit: u32_at(payload, 6),
            },
            tacho_count: u32_at(payload, 10) as i32,
            block_tacho_count: u32_at(payload, 14) as i32,
            rotation_count: u32_at(payload, 18) as i32,
        })
    }
}

/// Sensor readings reported by GETINPUTVALUES.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputValues {
    pub valid: bool,
    pub calibrated: bool,
    pub raw: u16,
    pub normalized: u16,
    pub scaled: i16,
    pub calibrated_value: i16,
}

impl InputValues {
    /// Parse the payload following the status byte.
    pub fn parse(payload: &[u8]) -> DeviceResult<Self> {
        expect_len("GETINPUTVALUES", payload, 13)?;
        Ok(Self {
            valid: payload[1] != 0,
            calibrated: payload[2] != 0,
            raw: u16_at(payload, 5),
            normalized: u16_at(payload, 7),
            scaled: u16_at(payload, 9) as i16,
            calibrated_value: u16_at(payload, 11) as i16,
        })
    }
}

fn expect_len(what: &str, payload: &[u8], len: usize) -> DeviceResult<()> {
    if payload.len() < len {
        return Err(DeviceError::Malformed(format!(
            "{what} reply has {} bytes, expected {len}",
            payload.len()
        )));
    }
    Ok(())
}

fn u16_at(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn u32_at(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Build a direct-command telegram that asks for a reply.
pub fn encode_command(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut telegram = Vec::with_capacity(payload.len() + 2);
    telegram.push(DIRECT_COMMAND);
    telegram.push(opcode);
    telegram.extend_from_slice(payload);
    telegram
}

/// Reply decoding outcome.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply<'a> {
    /// Reply to the expected opcode, payload after the status byte
    Payload(&'a [u8]),
    /// Reply to some earlier exchange
    Stale,
}

/// Validate a reply telegram for `opcode`.
pub fn decode_reply(opcode: u8, frame: &[u8]) -> DeviceResult<Reply<'_>> {
    if frame.len() < 3 || frame[0] != REPLY {
        return Err(DeviceError::Malformed(format!("not a reply: {}", hex::encode(frame))));
    }
    if frame[1] != opcode {
        return Ok(Reply::Stale);
    }
    match frame[2] {
        0 => Ok(Reply::Payload(&frame[3..])),
        code => Err(DeviceError::Status { opcode, code }),
    }
}

fn encode_output_state(port: MotorPort, state: &OutputState) -> Vec<u8> {
    let mut payload = vec![
        port.index(),
        state.power as u8,
        state.mode.bits(),
        state.regulation as u8,
        state.turn_ratio as u8,
        state.run_state as u8,
    ];
    payload.extend_from_slice(&state.tacho_limit.to_le_bytes());
    payload
}

/// Link a brick is reached over.
pub enum Transport {
    /// Bluetooth SPP, length-prefixed telegrams
    Serial(SerialPort),
    /// USB bulk endpoints, bare telegrams
    Usb(UsbPort),
}

impl Transport {
    async fn send(&mut self, telegram: &[u8]) -> DeviceResult<()> {
        match self {
            Transport::Serial(port) => port.write_frame(telegram).await,
            Transport::Usb(port) => port.write_frame(telegram).await,
        }
    }

    async fn recv(&mut self) -> DeviceResult<Vec<u8>> {
        match self {
            Transport::Serial(port) => port.read_frame_timeout().await,
            Transport::Usb(port) => port.read_frame_timeout().await,
        }
    }
}

/// NXT protocol handler.
pub struct Protocol {
    transport: Transport,
}

impl Protocol {
    /// Create a new protocol handler.
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Send a command and wait for its reply payload.
    pub async fn exchange(&mut self, opcode: u8, payload: &[u8]) -> DeviceResult<Vec<u8>> {
        self.transport.send(&encode_command(opcode, payload)).await?;

        for _ in 0..MAX_SKIP_FRAMES {
            let frame = self.transport.recv().await?;
            match decode_reply(opcode, &frame)? {
                Reply::Payload(data) => return Ok(data.to_vec()),
                Reply::Stale => {
                    tracing::debug!("Skipping stale reply: {}", hex::encode(&frame));
                }
            }
        }

        Err(DeviceError::Malformed(format!("no reply to opcode {opcode:#04x}")))
    }

    /// Play a tone.
    pub async fn play_tone(&mut self, frequency_hz: u16, duration_ms: u16) -> DeviceResult<()> {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&frequency_hz.to_le_bytes());
        payload.extend_from_slice(&duration_ms.to_le_bytes());
        self.exchange(PLAY_TONE, &payload).await?;
        Ok(())
    }

    /// Set a motor's output state.
    pub async fn set_output_state(
        &mut self,
        port: MotorPort,
        state: &OutputState,
    ) -> DeviceResult<()> {
        self.exchange(SET_OUTPUT_STATE, &encode_output_state(port, state)).await?;
        Ok(())
    }

    /// Read a motor's output state.
    pub async fn get_output_state(&mut self, port: MotorPort) -> DeviceResult<OutputStatus> {
        let payload = self.exchange(GET_OUTPUT_STATE, &[port.index()]).await?;
        OutputStatus::parse(&payload)
    }

    /// Configure a sensor port.
    pub async fn set_input_mode(
        &mut self,
        port: SensorPort,
        kind: SensorType,
        mode: SensorMode,
    ) -> DeviceResult<()> {
        self.exchange(SET_INPUT_MODE, &[port.index(), kind as u8, mode as u8]).await?;
        Ok(())
    }

    /// Read a sensor port.
    pub async fn get_input_values(&mut self, port: SensorPort) -> DeviceResult<InputValues> {
        let payload = self.exchange(GET_INPUT_VALUES, &[port.index()]).await?;
        InputValues::parse(&payload)
    }

    /// Reset a motor's position counter.
    pub async fn reset_motor_position(
        &mut self,
        port: MotorPort,
        relative: bool,
    ) -> DeviceResult<()> {
        self.exchange(RESET_MOTOR_POSITION, &[port.index(), u8::from(relative)]).await?;
        Ok(())
    }

    /// Battery voltage in millivolts.
    pub async fn get_battery_level(&mut self) -> DeviceResult<u16> {
        let payload = self.exchange(GET_BATTERY_LEVEL, &[]).await?;
        expect_len("GETBATTERYLEVEL", &payload, 2)?;
        Ok(u16_at(&payload, 0))
    }

    /// Bytes waiting in a low-speed port's receive buffer.
    pub async fn ls_get_status(&mut self, port: SensorPort) -> DeviceResult<u8> {
        let payload = self.exchange(LS_GET_STATUS, &[port.index()]).await?;
        expect_len("LSGETSTATUS", &payload, 1)?;
        Ok(payload[0])
    }

    /// Start a low-speed (I2C) transaction.
    pub async fn ls_write(&mut self, port: SensorPort, tx: &[u8], rx_len: u8) -> DeviceResult<()> {
        let mut payload = vec![port.index(), tx.len() as u8, rx_len];
        payload.extend_from_slice(tx);
        self.exchange(LS_WRITE, &payload).await?;
        Ok(())
    }

    /// Collect the result of a low-speed transaction.
    pub async fn ls_read(&mut self, port: SensorPort) -> DeviceResult<Vec<u8>> {
        let payload = self.exchange(LS_READ, &[port.index()]).await?;
        expect_len("LSREAD", &payload, 1)?;
        let n = (payload[0] as usize).min(payload.len() - 1);
        Ok(payload[1..=n].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_battery_request() {
        assert_eq!(encode_command(GET_BATTERY_LEVEL, &[]), vec![0x00, 0x0B]);
    }

    #[test]
    fn test_encode_output_state_layout() {
        let state = OutputState {
            power: -75,
            mode: OutputMode::MOTOR_ON | OutputMode::BRAKE | OutputMode::REGULATED,
            regulation: Regulation::Speed,
            turn_ratio: 0,
            run_state: RunState::Running,
            tacho_limit: 360,
        };
        assert_eq!(
            encode_output_state(MotorPort::B, &state),
            vec![0x01, 0xB5, 0x07, 0x01, 0x00, 0x20, 0x68, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_decode_reply_status_error() {
        let err = decode_reply(GET_INPUT_VALUES, &[0x02, 0x07, 0xC0]).unwrap_err();
        assert!(matches!(err, DeviceError::Status { opcode: 0x07, code: 0xC0 }));
    }

    #[test]
    fn test_decode_reply_stale_opcode() {
        assert_eq!(
            decode_reply(GET_BATTERY_LEVEL, &[0x02, 0x06, 0x00]).unwrap(),
            Reply::Stale
        );
    }

    #[test]
    fn test_decode_reply_rejects_non_reply() {
        assert!(decode_reply(GET_BATTERY_LEVEL, &[0x00, 0x0B]).is_err());
    }

    #[test]
    fn test_parse_input_values() {
        // port 2, valid, not calibrated, LIGHT_ACTIVE, RAW, raw 600, norm 512, scaled 47, cal 0
        let payload = [
            0x01, 0x01, 0x00, 0x05, 0x00, 0x58, 0x02, 0x00, 0x02, 0x2F, 0x00, 0x00, 0x00,
        ];
        let values = InputValues::parse(&payload).unwrap();
        assert!(values.valid);
        assert_eq!(values.raw, 600);
        assert_eq!(values.normalized, 512);
        assert_eq!(values.scaled, 47);
    }

    #[test]
    fn test_parse_output_status_negative_rotation() {
        let mut payload = vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&(-720i32).to_le_bytes());
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&(-720i32).to_le_bytes());
        let status = OutputStatus::parse(&payload).unwrap();
        assert_eq!(status.tacho_count, -720);
        assert_eq!(status.rotation_count, -720);
        assert_eq!(status.state.run_state, RunState::Idle);
    }

    #[test]
    fn test_parse_short_payload_is_malformed() {
        assert!(matches!(
            OutputStatus::parse(&[0x00, 0x01]),
            Err(DeviceError::Malformed(_))
        ));
    }
}
