//! Connection manager: discovery, reconnection and idle liveness probing.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::Instant;

use super::registry::Link;
use super::Bridge;
use crate::brick::{Brick, Locator};

/// Problem text shown by the host while no brick is reachable.
pub const DISCONNECTED: &str = "Mindstorms brick is disconnected.";

/// Outcome of [`Bridge::check_liveness`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// No handle, or the brick was used recently
    Skipped,
    /// Battery read answered; value in millivolts
    Alive(u16),
    /// Battery read failed and the handle was dropped
    Lost,
}

impl<L: Locator> Bridge<L> {
    /// Make sure a brick is connected, discovering one if needed.
    pub async fn ensure_connected(&self) -> bool {
        self.connect().await.is_some()
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_connected()
    }

    /// Connect if necessary and snapshot the session for one operation.
    ///
    /// Discovery runs outside the session lock. Callers that arrive while
    /// an attempt is in flight wait for it and share its outcome instead of
    /// starting their own. The sensor rebuild and installing the handle
    /// happen together under the session lock, so nobody sees the new
    /// handle paired with instances from the old one.
    pub(crate) async fn connect(&self) -> Option<Link<L::Brick>> {
        if let Some(link) = self.session.lock().await.link() {
            return Some(link);
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let _discovering = self.discovery.lock().await;
        if let Some(link) = self.session.lock().await.link() {
            return Some(link);
        }
        if self.attempts.load(Ordering::Acquire) != seen {
            // An attempt finished while we waited and found nothing
            return None;
        }

        let link = self.discover().await;
        self.attempts.fetch_add(1, Ordering::Release);
        link
    }

    /// One discovery attempt. Only called with the discovery lock held.
    async fn discover(&self) -> Option<Link<L::Brick>> {
        let brick = match self.locator.find_one().await {
            Ok(brick) => Arc::new(brick),
            Err(e) => {
                tracing::debug!("No brick: {}", e);
                return None;
            }
        };

        let mut session = self.session.lock().await;
        if let Err(e) = session.sensors.rebuild(&brick).await {
            tracing::warn!("Brick found but sensor setup failed: {}", e);
            return None;
        }

        session.install(brick);
        tracing::info!("Brick connected");
        session.link()
    }

    /// Check an idle brick with a battery read. Only runs when a handle
    /// exists and nothing has succeeded for longer than the idle threshold.
    pub async fn check_liveness(&self) -> Liveness {
        let brick = {
            let session = self.session.lock().await;
            let Some(brick) = session.brick() else {
                return Liveness::Skipped;
            };
            let idle = session
                .last_command()
                .map_or(true, |at| at.elapsed() > self.idle_threshold);
            if !idle {
                return Liveness::Skipped;
            }
            Arc::clone(brick)
        };

        match brick.battery_level().await {
            Ok(millivolts) => {
                tracing::debug!("Liveness check ok, battery {} mV", millivolts);
                self.session.lock().await.touch(Instant::now());
                Liveness::Alive(millivolts)
            }
            Err(e) => {
                tracing::warn!("Liveness check failed: {}", e);
                self.invalidate(&brick).await;
                Liveness::Lost
            }
        }
    }

    /// Host status poll. Reconnects, checks liveness and describes what is wrong.
    pub async fn problem(&self) -> Option<String> {
        self.ensure_connected().await;
        self.check_liveness().await;

        if self.is_connected().await {
            None
        } else {
            Some(DISCONNECTED.to_string())
        }
    }

    /// Drop `stale` if it is still the current handle.
    pub(crate) async fn invalidate(&self, stale: &Arc<L::Brick>) {
        if self.session.lock().await.invalidate(stale) {
            tracing::info!("Brick disconnected");
        }
    }
}
