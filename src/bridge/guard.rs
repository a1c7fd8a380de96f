//! Guarded execution.
//!
//! Every hardware-facing block runs through [`Bridge::guarded`]. A missing
//! brick or a failed exchange turns into the operation's no-op value
//! (`Default::default()`), never into an error for the host.

use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

use super::registry::Link;
use super::Bridge;
use crate::brick::Locator;
use crate::error::DeviceResult;

impl<L: Locator> Bridge<L> {
    /// Run `op` against the current brick.
    ///
    /// Connects first and returns `T::default()` without calling `op` when
    /// that fails. If `op` fails, the handle it used is dropped so the next
    /// call rediscovers, and `T::default()` is returned. Success refreshes
    /// the last-command timestamp.
    pub async fn guarded<T, F, Fut>(&self, name: &'static str, op: F) -> T
    where
        T: Default,
        F: FnOnce(Link<L::Brick>) -> Fut,
        Fut: Future<Output = DeviceResult<T>>,
    {
        let Some(link) = self.connect().await else {
            tracing::debug!("{}: no brick, skipped", name);
            return T::default();
        };
        let brick = Arc::clone(link.brick());

        match op(link).await {
            Ok(value) => {
                self.session.lock().await.touch(Instant::now());
                value
            }
            Err(e) => {
                // Either way the session is no longer trusted
                if e.is_link_loss() {
                    tracing::warn!("{}: link lost: {}", name, e);
                } else {
                    tracing::warn!("{}: brick rejected request: {}", name, e);
                }
                self.invalidate(&brick).await;
                T::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brick::Brick;
    use crate::bridge::Liveness;
    use crate::error::DeviceError;
    use crate::fake::{FakeCall, FakeLocator};
    use std::time::Duration;

    fn bridge(locator: &FakeLocator) -> Bridge<FakeLocator> {
        Bridge::new(locator.clone(), Duration::from_secs(100))
    }

    #[tokio::test]
    async fn test_absent_brick_returns_default_without_running() {
        let locator = FakeLocator::absent();
        let bridge = bridge(&locator);
        let mut ran = false;

        let value: Option<u16> = bridge
            .guarded("battery", |link| {
                ran = true;
                async move { link.brick().battery_level().await.map(Some) }
            })
            .await;

        assert_eq!(value, None);
        assert!(!ran);
        assert_eq!(locator.discoveries(), 1);
        assert!(locator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_invalidates_then_rediscovers() {
        let locator = FakeLocator::new();
        let bridge = bridge(&locator);
        locator.fail_after(0);

        let first: bool = bridge
            .guarded("battery", |link| async move {
                link.brick().battery_level().await.map(|_| true)
            })
            .await;
        assert!(!first);
        assert!(!bridge.is_connected().await);

        let second: bool = bridge
            .guarded("battery", |link| async move {
                link.brick().battery_level().await.map(|_| true)
            })
            .await;
        assert!(second);
        assert_eq!(locator.discoveries(), 2);
        assert_eq!(locator.calls(), vec![FakeCall::Battery, FakeCall::Battery]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_refreshes_last_command() {
        let locator = FakeLocator::new();
        let bridge = bridge(&locator);

        let _: () = bridge.guarded("noop", |_link| async { Ok(()) }).await;
        assert_eq!(bridge.check_liveness().await, Liveness::Skipped);
    }

    #[tokio::test]
    async fn test_rejected_command_also_invalidates() {
        let locator = FakeLocator::new();
        let bridge = bridge(&locator);

        let value: Option<u8> = bridge
            .guarded("reject", |_link| async {
                Err(DeviceError::Status { opcode: 0x05, code: 0xC0 })
            })
            .await;

        assert_eq!(value, None);
        assert!(!bridge.is_connected().await);
    }
}
