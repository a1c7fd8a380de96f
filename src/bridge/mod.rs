//! The bridge between block-host calls and a brick that comes and goes.
//!
//! [`Bridge`] owns the one session with the brick. Discovery and liveness
//! live in `connection`, the guarded-execution combinator in `guard`, the
//! session itself in `registry`. The block catalog in [`crate::blocks`] is
//! built entirely on top of [`Bridge::guarded`].

mod connection;
mod guard;
mod registry;

pub use connection::{Liveness, DISCONNECTED};

use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::brick::Locator;
use crate::sensor::{SensorInstance, SensorKind, SensorPort};
use registry::Session;

/// Shared bridge state. Wrap in an `Arc` to share between request handlers.
pub struct Bridge<L: Locator> {
    locator: L,
    session: Mutex<Session<L::Brick>>,
    /// Held for the duration of one discovery attempt
    discovery: Mutex<()>,
    /// Discovery attempts finished so far
    attempts: AtomicU64,
    idle_threshold: Duration,
}

impl<L: Locator> Bridge<L> {
    /// Create a bridge with no brick attached yet.
    pub fn new(locator: L, idle_threshold: Duration) -> Self {
        Self {
            locator,
            session: Mutex::new(Session::default()),
            discovery: Mutex::new(()),
            attempts: AtomicU64::new(0),
            idle_threshold,
        }
    }

    /// Record that `port` holds a `kind` sensor. When a brick is connected
    /// the sensor is configured straight away; a failure there drops the
    /// connection instead of surfacing.
    pub async fn attach(&self, port: SensorPort, kind: SensorKind) {
        let mut session = self.session.lock().await;
        session.sensors.bind(port, kind);

        let Some(brick) = session.brick().cloned() else {
            tracing::debug!("Bound {:?} to {:?}; no brick yet", kind, port);
            return;
        };

        match SensorInstance::attach(brick.clone(), port, kind).await {
            Ok(instance) => session.sensors.install(instance),
            Err(e) => {
                tracing::warn!("Attaching {:?} sensor on {:?} failed: {}", kind, port, e);
                session.invalidate(&brick);
            }
        }
    }

    /// Declared binding for `port`.
    pub async fn binding(&self, port: SensorPort) -> Option<SensorKind> {
        self.session.lock().await.sensors.binding(port)
    }

    /// Live instance on `port`, only if it matches `expected`.
    pub async fn instance(
        &self,
        port: SensorPort,
        expected: SensorKind,
    ) -> Option<SensorInstance<L::Brick>> {
        self.session.lock().await.sensors.instance(port, expected).cloned()
    }

    /// Forget every live sensor instance. Bindings stay.
    pub(crate) async fn clear_instances(&self) {
        self.session.lock().await.sensors.clear_instances();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeCall, FakeLocator};
    use crate::protocol::{SensorMode, SensorType};

    fn bridge(locator: &FakeLocator) -> Bridge<FakeLocator> {
        Bridge::new(locator.clone(), Duration::from_secs(100))
    }

    #[tokio::test]
    async fn test_attach_while_disconnected_only_binds() {
        let locator = FakeLocator::absent();
        let bridge = bridge(&locator);

        bridge.attach(SensorPort::Two, SensorKind::Sound).await;

        assert_eq!(bridge.binding(SensorPort::Two).await, Some(SensorKind::Sound));
        assert!(bridge.instance(SensorPort::Two, SensorKind::Sound).await.is_none());
        // attach never triggers discovery
        assert_eq!(locator.discoveries(), 0);
        assert!(locator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_attach_while_connected_builds_instance() {
        let locator = FakeLocator::new();
        let bridge = bridge(&locator);
        assert!(bridge.ensure_connected().await);

        bridge.attach(SensorPort::One, SensorKind::Light).await;

        let inst = bridge.instance(SensorPort::One, SensorKind::Light).await.unwrap();
        assert_eq!(inst.port(), SensorPort::One);
        assert_eq!(
            locator.calls(),
            vec![FakeCall::SetInputMode(SensorPort::One, SensorType::LightActive, SensorMode::Raw)]
        );
    }

    #[tokio::test]
    async fn test_reattach_replaces_type_and_instance() {
        let locator = FakeLocator::new();
        let bridge = bridge(&locator);
        assert!(bridge.ensure_connected().await);

        bridge.attach(SensorPort::One, SensorKind::Light).await;
        bridge.attach(SensorPort::One, SensorKind::Touch).await;

        assert_eq!(bridge.binding(SensorPort::One).await, Some(SensorKind::Touch));
        assert!(bridge.instance(SensorPort::One, SensorKind::Light).await.is_none());
        assert!(bridge.instance(SensorPort::One, SensorKind::Touch).await.is_some());
    }

    #[tokio::test]
    async fn test_attach_failure_drops_connection() {
        let locator = FakeLocator::new();
        let bridge = bridge(&locator);
        assert!(bridge.ensure_connected().await);
        locator.fail_after(0);

        bridge.attach(SensorPort::Three, SensorKind::Touch).await;

        assert!(!bridge.is_connected().await);
        assert_eq!(bridge.binding(SensorPort::Three).await, Some(SensorKind::Touch));
    }
}
