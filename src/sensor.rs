//! Sensor ports, bindings and live sensor instances.
//!
//! A binding is what the host declared ("port-2 has a light sensor"). An
//! instance is that binding wired to the current brick session. Bindings
//! survive reconnects; instances never do.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::blocks::Menu;
use crate::brick::Brick;
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::{SensorMode, SensorType, STATUS_PENDING};

/// I2C address and distance register of the ultrasonic sensor.
const ULTRASONIC_READ: [u8; 2] = [0x02, 0x42];

/// Status polls before an I2C read is abandoned.
const LS_POLL_ATTEMPTS: usize = 25;
const LS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Physical sensor port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorPort {
    One,
    Two,
    Three,
    Four,
}

impl SensorPort {
    pub const ALL: [SensorPort; 4] = [
        SensorPort::One,
        SensorPort::Two,
        SensorPort::Three,
        SensorPort::Four,
    ];

    /// Port number on the wire.
    pub fn index(self) -> u8 {
        match self {
            SensorPort::One => 0,
            SensorPort::Two => 1,
            SensorPort::Three => 2,
            SensorPort::Four => 3,
        }
    }

    fn slot(self) -> usize {
        self.index() as usize
    }
}

impl Menu for SensorPort {
    const NAME: &'static str = "nxtPort";
    const CHOICES: &'static [Self] = &SensorPort::ALL;

    fn label(self) -> &'static str {
        match self {
            SensorPort::One => "port-1",
            SensorPort::Two => "port-2",
            SensorPort::Three => "port-3",
            SensorPort::Four => "port-4",
        }
    }
}

/// Sensor type a port can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Distance,
    Light,
    Sound,
    Touch,
}

impl SensorKind {
    /// Input mode that configures the brick for this sensor.
    fn input_mode(self) -> (SensorType, SensorMode) {
        match self {
            SensorKind::Light => (SensorType::LightActive, SensorMode::Raw),
            SensorKind::Sound => (SensorType::SoundDba, SensorMode::Raw),
            SensorKind::Touch => (SensorType::Switch, SensorMode::Boolean),
            SensorKind::Distance => (SensorType::LowSpeed9V, SensorMode::Raw),
        }
    }
}

impl Menu for SensorKind {
    const NAME: &'static str = "nxtSensor";
    const CHOICES: &'static [Self] = &[
        SensorKind::Distance,
        SensorKind::Light,
        SensorKind::Sound,
        SensorKind::Touch,
    ];

    fn label(self) -> &'static str {
        match self {
            SensorKind::Distance => "distance",
            SensorKind::Light => "light",
            SensorKind::Sound => "sound",
            SensorKind::Touch => "touch",
        }
    }
}

/// Sensor kinds that report a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingKind {
    Distance,
    Light,
    Sound,
}

impl ReadingKind {
    pub fn sensor(self) -> SensorKind {
        match self {
            ReadingKind::Distance => SensorKind::Distance,
            ReadingKind::Light => SensorKind::Light,
            ReadingKind::Sound => SensorKind::Sound,
        }
    }
}

impl Menu for ReadingKind {
    const NAME: &'static str = "nxtReporter";
    const CHOICES: &'static [Self] =
        &[ReadingKind::Distance, ReadingKind::Light, ReadingKind::Sound];

    fn label(self) -> &'static str {
        self.sensor().label()
    }
}

/// One sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Light(i16),
    Sound(i16),
    /// Centimetres; 255 means nothing in range
    Distance(u8),
    Touch(bool),
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sample::Light(v) | Sample::Sound(v) => write!(f, "{v}"),
            Sample::Distance(cm) => write!(f, "{cm}"),
            Sample::Touch(pressed) => write!(f, "{pressed}"),
        }
    }
}

/// A sensor wired to a specific brick session.
pub struct SensorInstance<B> {
    brick: Arc<B>,
    port: SensorPort,
    kind: SensorKind,
}

impl<B> Clone for SensorInstance<B> {
    fn clone(&self) -> Self {
        Self {
            brick: Arc::clone(&self.brick),
            port: self.port,
            kind: self.kind,
        }
    }
}

impl<B: Brick> SensorInstance<B> {
    /// Configure `port` for `kind` and return the live instance.
    pub async fn attach(brick: Arc<B>, port: SensorPort, kind: SensorKind) -> DeviceResult<Self> {
        let (sensor_type, mode) = kind.input_mode();
        brick.set_input_mode(port, sensor_type, mode).await?;
        Ok(Self { brick, port, kind })
    }

    /// Light sensor handle that skips setup, for toggling the lamp on a
    /// port nobody attached.
    pub fn transient_light(brick: Arc<B>, port: SensorPort) -> Self {
        Self {
            brick,
            port,
            kind: SensorKind::Light,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn port(&self) -> SensorPort {
        self.port
    }

    /// Whether this instance talks to `brick`.
    pub fn is_bound_to(&self, brick: &Arc<B>) -> bool {
        Arc::ptr_eq(&self.brick, brick)
    }

    pub async fn sample(&self) -> DeviceResult<Sample> {
        match self.kind {
            SensorKind::Light => Ok(Sample::Light(self.scaled().await?)),
            SensorKind::Sound => Ok(Sample::Sound(self.scaled().await?)),
            SensorKind::Touch => Ok(Sample::Touch(self.scaled().await? != 0)),
            SensorKind::Distance => Ok(Sample::Distance(self.ultrasonic_distance().await?)),
        }
    }

    /// Switch the light sensor's lamp.
    pub async fn set_illuminated(&self, on: bool) -> DeviceResult<()> {
        let sensor_type = if on {
            SensorType::LightActive
        } else {
            SensorType::LightInactive
        };
        self.brick.set_input_mode(self.port, sensor_type, SensorMode::Raw).await
    }

    async fn scaled(&self) -> DeviceResult<i16> {
        Ok(self.brick.get_input_values(self.port).await?.scaled)
    }

    async fn ultrasonic_distance(&self) -> DeviceResult<u8> {
        self.brick.ls_write(self.port, &ULTRASONIC_READ, 1).await?;

        for _ in 0..LS_POLL_ATTEMPTS {
            match self.brick.ls_get_status(self.port).await {
                Ok(ready) if ready >= 1 => {
                    let data = self.brick.ls_read(self.port).await?;
                    return data
                        .first()
                        .copied()
                        .ok_or_else(|| DeviceError::Malformed("empty ultrasonic read".into()));
                }
                Ok(_) | Err(DeviceError::Status { code: STATUS_PENDING, .. }) => {
                    tokio::time::sleep(LS_POLL_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(DeviceError::BusTimeout(self.port.index() + 1))
    }
}

/// Per-port bindings plus the instances built for the current session.
pub struct SensorBank<B> {
    bindings: [Option<SensorKind>; 4],
    instances: [Option<SensorInstance<B>>; 4],
}

impl<B> Default for SensorBank<B> {
    fn default() -> Self {
        Self {
            bindings: [None; 4],
            instances: [None, None, None, None],
        }
    }
}

impl<B: Brick> SensorBank<B> {
    pub fn binding(&self, port: SensorPort) -> Option<SensorKind> {
        self.bindings[port.slot()]
    }

    /// Record a binding, dropping whatever instance the port had.
    pub fn bind(&mut self, port: SensorPort, kind: SensorKind) {
        self.bindings[port.slot()] = Some(kind);
        self.instances[port.slot()] = None;
    }

    pub fn install(&mut self, instance: SensorInstance<B>) {
        let slot = instance.port.slot();
        self.instances[slot] = Some(instance);
    }

    /// Live instance on `port`, only if it is of the `expected` kind.
    pub fn instance(&self, port: SensorPort, expected: SensorKind) -> Option<&SensorInstance<B>> {
        self.instances[port.slot()]
            .as_ref()
            .filter(|inst| inst.kind == expected)
    }

    pub fn clear_instances(&mut self) {
        self.instances = [None, None, None, None];
    }

    pub fn instances(&self) -> [Option<SensorInstance<B>>; 4] {
        self.instances.clone()
    }

    /// Rebuild every bound port against `brick`. All or nothing: on error
    /// the bank is left with no instances.
    pub async fn rebuild(&mut self, brick: &Arc<B>) -> DeviceResult<()> {
        self.clear_instances();

        let mut fresh: [Option<SensorInstance<B>>; 4] = [None, None, None, None];
        for port in SensorPort::ALL {
            if let Some(kind) = self.binding(port) {
                let instance = SensorInstance::attach(Arc::clone(brick), port, kind).await?;
                fresh[port.slot()] = Some(instance);
            }
        }

        self.instances = fresh;
        Ok(())
    }
}
