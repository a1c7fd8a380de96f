//! Device handle registry.
//!
//! The session is the only place the current brick handle lives. It is
//! replaced together with the sensor instances built for it, under the
//! bridge's session lock.

use std::sync::Arc;
use tokio::time::Instant;

use crate::brick::Brick;
use crate::motor::{Motor, MotorPort, MotorSelector, Motors};
use crate::sensor::{SensorBank, SensorInstance, SensorKind, SensorPort};

/// Handle, sensors and activity timestamp for the current connection.
pub struct Session<B> {
    brick: Option<Arc<B>>,
    pub(crate) sensors: SensorBank<B>,
    last_command: Option<Instant>,
}

impl<B> Default for Session<B> {
    fn default() -> Self {
        Self {
            brick: None,
            sensors: SensorBank::default(),
            last_command: None,
        }
    }
}

impl<B: Brick> Session<B> {
    pub fn brick(&self) -> Option<&Arc<B>> {
        self.brick.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.brick.is_some()
    }

    /// Install a freshly discovered brick. The caller has already rebuilt
    /// `sensors` against it.
    pub fn install(&mut self, brick: Arc<B>) {
        self.brick = Some(brick);
    }

    /// Drop the handle, but only if it is still `stale`. A caller that
    /// failed on an old session must not knock out a newer one.
    pub fn invalidate(&mut self, stale: &Arc<B>) -> bool {
        match &self.brick {
            Some(current) if Arc::ptr_eq(current, stale) => {
                self.brick = None;
                self.sensors.clear_instances();
                true
            }
            _ => false,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_command = Some(now);
    }

    pub fn last_command(&self) -> Option<Instant> {
        self.last_command
    }

    /// Snapshot for one guarded operation.
    pub fn link(&self) -> Option<Link<B>> {
        self.brick.as_ref().map(|brick| Link {
            brick: Arc::clone(brick),
            sensors: self.sensors.instances(),
        })
    }
}

/// What a guarded operation gets to work with: the handle and the sensor
/// instances that belong to it, copied out of the session.
pub struct Link<B> {
    brick: Arc<B>,
    sensors: [Option<SensorInstance<B>>; 4],
}

impl<B: Brick> Link<B> {
    pub fn brick(&self) -> &Arc<B> {
        &self.brick
    }

    /// Live sensor on `port`, if it is of the `expected` kind.
    pub fn sensor(&self, port: SensorPort, expected: SensorKind) -> Option<&SensorInstance<B>> {
        self.sensors
            .iter()
            .flatten()
            .find(|inst| inst.port() == port && inst.kind() == expected)
    }

    /// Fresh motor reference, independent of anything registered.
    pub fn motor(&self, port: MotorPort) -> Motor<B> {
        Motor::new(Arc::clone(&self.brick), port)
    }

    pub fn motors(&self, selector: MotorSelector) -> Motors<B> {
        Motors::select(&self.brick, selector)
    }
}
