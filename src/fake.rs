//! In-memory brick for tests.
//!
//! Records every call, can pretend to be absent, and fails a chosen call
//! with an I/O error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::brick::{Brick, Locator};
use crate::error::{DeviceError, DeviceResult};
use crate::motor::MotorPort;
use crate::protocol::{InputValues, OutputState, OutputStatus, SensorMode, SensorType};
use crate::sensor::SensorPort;

/// One recorded brick call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    SetOutput(MotorPort, OutputState),
    GetOutput(MotorPort),
    ResetPosition(MotorPort, bool),
    SetInputMode(SensorPort, SensorType, SensorMode),
    GetInput(SensorPort),
    LsWrite(SensorPort, Vec<u8>, u8),
    LsStatus(SensorPort),
    LsRead(SensorPort),
    Battery,
    Tone(u16, u16),
}

struct FakeState {
    present: bool,
    discoveries: usize,
    calls: Vec<FakeCall>,
    /// Successful calls left before the next one fails
    fail_in: Option<usize>,
    inputs: HashMap<SensorPort, InputValues>,
    outputs: HashMap<MotorPort, OutputStatus>,
    ls_data: HashMap<SensorPort, Vec<u8>>,
    battery_mv: u16,
}

/// Test locator; clones share state.
#[derive(Clone)]
pub struct FakeLocator {
    state: Arc<Mutex<FakeState>>,
}

impl FakeLocator {
    /// A locator that finds a brick.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                present: true,
                discoveries: 0,
                calls: Vec::new(),
                fail_in: None,
                inputs: HashMap::new(),
                outputs: HashMap::new(),
                ls_data: HashMap::new(),
                battery_mv: 7_400,
            })),
        }
    }

    /// A locator whose brick is switched off.
    pub fn absent() -> Self {
        let locator = Self::new();
        locator.set_present(false);
        locator
    }

    pub fn set_present(&self, present: bool) {
        self.state.lock().unwrap().present = present;
    }

    /// A brick on this locator's state, without counting a discovery.
    pub fn brick(&self) -> FakeBrick {
        FakeBrick {
            state: Arc::clone(&self.state),
        }
    }

    pub fn discoveries(&self) -> usize {
        self.state.lock().unwrap().discoveries
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Let `n` brick calls succeed, then fail the next one.
    pub fn fail_after(&self, n: usize) {
        self.state.lock().unwrap().fail_in = Some(n);
    }

    pub fn set_input(&self, port: SensorPort, values: InputValues) {
        self.state.lock().unwrap().inputs.insert(port, values);
    }

    pub fn set_output(&self, port: MotorPort, status: OutputStatus) {
        self.state.lock().unwrap().outputs.insert(port, status);
    }

    pub fn set_ls_data(&self, port: SensorPort, data: Vec<u8>) {
        self.state.lock().unwrap().ls_data.insert(port, data);
    }
}

impl Locator for FakeLocator {
    type Brick = FakeBrick;

    async fn find_one(&self) -> DeviceResult<FakeBrick> {
        let present = {
            let mut state = self.state.lock().unwrap();
            state.discoveries += 1;
            state.present
        };
        // Give concurrent callers a chance to pile up behind this attempt
        tokio::task::yield_now().await;
        if present {
            Ok(self.brick())
        } else {
            Err(DeviceError::NotFound)
        }
    }
}

/// Test brick.
pub struct FakeBrick {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBrick {
    fn record(&self, call: FakeCall) -> DeviceResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.fail_in {
            Some(0) => {
                state.fail_in = None;
                Err(DeviceError::Io(std::io::ErrorKind::BrokenPipe.into()))
            }
            Some(n) => {
                state.fail_in = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Brick for FakeBrick {
    async fn set_output_state(&self, port: MotorPort, state: OutputState) -> DeviceResult<()> {
        self.record(FakeCall::SetOutput(port, state))
    }

    async fn get_output_state(&self, port: MotorPort) -> DeviceResult<OutputStatus> {
        self.record(FakeCall::GetOutput(port))?;
        Ok(self.state.lock().unwrap().outputs.get(&port).copied().unwrap_or_default())
    }

    async fn reset_motor_position(&self, port: MotorPort, relative: bool) -> DeviceResult<()> {
        self.record(FakeCall::ResetPosition(port, relative))
    }

    async fn set_input_mode(
        &self,
        port: SensorPort,
        kind: SensorType,
        mode: SensorMode,
    ) -> DeviceResult<()> {
        self.record(FakeCall::SetInputMode(port, kind, mode))
    }

    async fn get_input_values(&self, port: SensorPort) -> DeviceResult<InputValues> {
        self.record(FakeCall::GetInput(port))?;
        Ok(self.state.lock().unwrap().inputs.get(&port).copied().unwrap_or_default())
    }

    async fn ls_write(&self, port: SensorPort, tx: &[u8], rx_len: u8) -> DeviceResult<()> {
        self.record(FakeCall::LsWrite(port, tx.to_vec(), rx_len))
    }

    async fn ls_get_status(&self, port: SensorPort) -> DeviceResult<u8> {
        self.record(FakeCall::LsStatus(port))?;
        Ok(self.state.lock().unwrap().ls_data.get(&port).map_or(0, |d| d.len() as u8))
    }

    async fn ls_read(&self, port: SensorPort) -> DeviceResult<Vec<u8>> {
        self.record(FakeCall::LsRead(port))?;
        Ok(self.state.lock().unwrap().ls_data.get(&port).cloned().unwrap_or_default())
    }

    async fn battery_level(&self) -> DeviceResult<u16> {
        self.record(FakeCall::Battery)?;
        Ok(self.state.lock().unwrap().battery_mv)
    }

    async fn play_tone(&self, frequency_hz: u16, duration_ms: u16) -> DeviceResult<()> {
        self.record(FakeCall::Tone(frequency_hz, duration_ms))
    }
}
