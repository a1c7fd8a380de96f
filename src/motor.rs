//! Motor addressing and control.
//!
//! [`MotorSelector`] maps the host's motor menu onto one or two physical
//! ports. Two-port selectors drive a [`SynchronizedMotors`] pair.

use std::sync::Arc;
use std::time::Duration;

use crate::blocks::Menu;
use crate::brick::Brick;
use crate::error::DeviceResult;
use crate::protocol::{OutputMode, OutputState, OutputStatus, Regulation, RunState};

/// Turn ratio for synchronized pairs; the follower tracks the leader.
pub const SYNC_TURN_RATIO: i8 = 1;

/// Tacho polling interval while a turn is in progress.
const TURN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Physical motor port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorPort {
    A,
    B,
    C,
}

impl MotorPort {
    pub const ALL: [MotorPort; 3] = [MotorPort::A, MotorPort::B, MotorPort::C];

    /// Port number on the wire.
    pub fn index(self) -> u8 {
        match self {
            MotorPort::A => 0,
            MotorPort::B => 1,
            MotorPort::C => 2,
        }
    }
}

impl Menu for MotorPort {
    const NAME: &'static str = "nxtRotation";
    const CHOICES: &'static [Self] = &MotorPort::ALL;

    fn label(self) -> &'static str {
        match self {
            MotorPort::A => "motor-A",
            MotorPort::B => "motor-B",
            MotorPort::C => "motor-C",
        }
    }
}

/// Logical motor choice: a single port or a synchronized pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorSelector {
    A,
    B,
    C,
    AB,
    AC,
    BC,
}

impl MotorSelector {
    /// Leader port and, for pairs, the follower.
    pub fn ports(self) -> (MotorPort, Option<MotorPort>) {
        match self {
            MotorSelector::A => (MotorPort::A, None),
            MotorSelector::B => (MotorPort::B, None),
            MotorSelector::C => (MotorPort::C, None),
            MotorSelector::AB => (MotorPort::A, Some(MotorPort::B)),
            MotorSelector::AC => (MotorPort::A, Some(MotorPort::C)),
            MotorSelector::BC => (MotorPort::B, Some(MotorPort::C)),
        }
    }
}

impl Menu for MotorSelector {
    const NAME: &'static str = "nxtMotor";
    const CHOICES: &'static [Self] = &[
        MotorSelector::A,
        MotorSelector::B,
        MotorSelector::C,
        MotorSelector::AB,
        MotorSelector::AC,
        MotorSelector::BC,
    ];

    fn label(self) -> &'static str {
        match self {
            MotorSelector::A => "motor-A",
            MotorSelector::B => "motor-B",
            MotorSelector::C => "motor-C",
            MotorSelector::AB => "motor-A-and-B",
            MotorSelector::AC => "motor-A-and-C",
            MotorSelector::BC => "motor-B-and-C",
        }
    }
}

/// Upper bound on how long a turn may take before we stop waiting.
///
/// An unloaded motor at full power does roughly 1000 degrees per second.
fn turn_deadline(power: i8, degrees: u32) -> Duration {
    let deg_per_sec = 10.0 * f64::from(power.unsigned_abs().max(1));
    Duration::from_secs(1) + Duration::from_secs_f64(2.0 * f64::from(degrees) / deg_per_sec)
}

/// A single motor on a brick.
pub struct Motor<B> {
    brick: Arc<B>,
    port: MotorPort,
}

impl<B: Brick> Motor<B> {
    pub fn new(brick: Arc<B>, port: MotorPort) -> Self {
        Self { brick, port }
    }

    /// Run unregulated at `power` until told otherwise.
    pub async fn run(&self, power: i8) -> DeviceResult<()> {
        let state = OutputState {
            power,
            mode: OutputMode::MOTOR_ON,
            regulation: Regulation::Idle,
            turn_ratio: 0,
            run_state: RunState::Running,
            tacho_limit: 0,
        };
        self.brick.set_output_state(self.port, state).await
    }

    /// Actively hold the motor at its current position.
    pub async fn brake(&self) -> DeviceResult<()> {
        let state = OutputState {
            power: 0,
            mode: OutputMode::MOTOR_ON | OutputMode::BRAKE | OutputMode::REGULATED,
            regulation: Regulation::Speed,
            turn_ratio: 0,
            run_state: RunState::Running,
            tacho_limit: 0,
        };
        self.brick.set_output_state(self.port, state).await
    }

    /// Turn by `degrees` at `power` and brake. Direction comes from the sign
    /// of `power`.
    pub async fn turn(&self, power: i8, degrees: u32) -> DeviceResult<()> {
        if power == 0 || degrees == 0 {
            return Ok(());
        }
        let state = OutputState {
            power,
            mode: OutputMode::MOTOR_ON | OutputMode::BRAKE | OutputMode::REGULATED,
            regulation: Regulation::Speed,
            turn_ratio: 0,
            run_state: RunState::Running,
            tacho_limit: degrees,
        };
        self.brick.set_output_state(self.port, state).await?;
        self.wait_idle(turn_deadline(power, degrees)).await?;
        self.brake().await
    }

    /// Current tachometer readings.
    pub async fn tacho(&self) -> DeviceResult<OutputStatus> {
        self.brick.get_output_state(self.port).await
    }

    /// Reset the position counter. `relative` resets the block counter only.
    pub async fn reset_position(&self, relative: bool) -> DeviceResult<()> {
        self.brick.reset_motor_position(self.port, relative).await
    }

    async fn wait_idle(&self, deadline: Duration) -> DeviceResult<()> {
        let start = tokio::time::Instant::now();
        loop {
            if self.tacho().await?.state.run_state == RunState::Idle {
                return Ok(());
            }
            if start.elapsed() >= deadline {
                tracing::debug!(
                    "Motor {:?} still running after {:?}, braking",
                    self.port,
                    deadline
                );
                return Ok(());
            }
            tokio::time::sleep(TURN_POLL_INTERVAL).await;
        }
    }
}

/// Two motors driven in lockstep.
pub struct SynchronizedMotors<B> {
    leader: Motor<B>,
    follower: Motor<B>,
    turn_ratio: i8,
}

impl<B: Brick> SynchronizedMotors<B> {
    pub fn new(leader: Motor<B>, follower: Motor<B>, turn_ratio: i8) -> Self {
        Self {
            leader,
            follower,
            turn_ratio,
        }
    }

    fn sync_state(&self, power: i8, tacho_limit: u32) -> OutputState {
        OutputState {
            power,
            mode: OutputMode::MOTOR_ON | OutputMode::REGULATED,
            regulation: Regulation::Sync,
            turn_ratio: self.turn_ratio,
            run_state: RunState::Running,
            tacho_limit,
        }
    }

    async fn start(&self, power: i8, tacho_limit: u32) -> DeviceResult<()> {
        // Sync regulation works off the block counters
        self.leader.reset_position(true).await?;
        self.follower.reset_position(true).await?;

        let state = self.sync_state(power, tacho_limit);
        self.leader.brick.set_output_state(self.leader.port, state).await?;
        self.follower.brick.set_output_state(self.follower.port, state).await
    }

    pub async fn run(&self, power: i8) -> DeviceResult<()> {
        self.start(power, 0).await
    }

    pub async fn brake(&self) -> DeviceResult<()> {
        self.leader.brake().await?;
        self.follower.brake().await
    }

    pub async fn turn(&self, power: i8, degrees: u32) -> DeviceResult<()> {
        if power == 0 || degrees == 0 {
            return Ok(());
        }
        self.start(power, degrees).await?;
        self.leader.wait_idle(turn_deadline(power, degrees)).await?;
        self.brake().await
    }
}

/// Whatever a [`MotorSelector`] resolves to.
pub enum Motors<B> {
    Single(Motor<B>),
    Pair(SynchronizedMotors<B>),
}

impl<B: Brick> Motors<B> {
    pub fn select(brick: &Arc<B>, selector: MotorSelector) -> Self {
        match selector.ports() {
            (port, None) => Motors::Single(Motor::new(Arc::clone(brick), port)),
            (leader, Some(follower)) => Motors::Pair(SynchronizedMotors::new(
                Motor::new(Arc::clone(brick), leader),
                Motor::new(Arc::clone(brick), follower),
                SYNC_TURN_RATIO,
            )),
        }
    }

    pub async fn run(&self, power: i8) -> DeviceResult<()> {
        match self {
            Motors::Single(m) => m.run(power).await,
            Motors::Pair(p) => p.run(power).await,
        }
    }

    pub async fn brake(&self) -> DeviceResult<()> {
        match self {
            Motors::Single(m) => m.brake().await,
            Motors::Pair(p) => p.brake().await,
        }
    }

    pub async fn turn(&self, power: i8, degrees: u32) -> DeviceResult<()> {
        match self {
            Motors::Single(m) => m.turn(power, degrees).await,
            Motors::Pair(p) => p.turn(power, degrees).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeCall, FakeLocator};

    #[test]
    fn test_selector_ports() {
        assert_eq!(MotorSelector::B.ports(), (MotorPort::B, None));
        assert_eq!(MotorSelector::AC.ports(), (MotorPort::A, Some(MotorPort::C)));
    }

    #[test]
    fn test_menu_labels_round_trip_through_parse() {
        assert_eq!(MotorSelector::from_label("motor-B-and-C"), Some(MotorSelector::BC));
        assert_eq!(MotorPort::from_label("motor-D"), None);
    }

    #[test]
    fn test_turn_deadline_grows_with_degrees() {
        assert!(turn_deadline(100, 3600) > turn_deadline(100, 360));
        assert!(turn_deadline(10, 360) > turn_deadline(100, 360));
    }

    #[tokio::test]
    async fn test_single_turn_sets_limit_then_brakes() {
        let locator = FakeLocator::new();
        let brick = Arc::new(locator.brick());

        Motors::select(&brick, MotorSelector::B).turn(-60, 90).await.unwrap();

        let calls = locator.calls();
        match &calls[0] {
            FakeCall::SetOutput(MotorPort::B, state) => {
                assert_eq!(state.power, -60);
                assert_eq!(state.tacho_limit, 90);
                assert_eq!(state.regulation, Regulation::Speed);
            }
            other => panic!("unexpected first call {other:?}"),
        }
        assert!(matches!(calls[1], FakeCall::GetOutput(MotorPort::B)));
        match calls.last() {
            Some(FakeCall::SetOutput(MotorPort::B, state)) => {
                assert!(state.mode.contains(OutputMode::BRAKE));
                assert_eq!(state.power, 0);
            }
            other => panic!("expected brake, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pair_runs_in_sync_with_ratio_one() {
        let locator = FakeLocator::new();
        let brick = Arc::new(locator.brick());

        Motors::select(&brick, MotorSelector::AC).run(50).await.unwrap();

        let outputs: Vec<_> = locator
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                FakeCall::SetOutput(port, state) => Some((port, state)),
                _ => None,
            })
            .collect();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].0, MotorPort::A);
        assert_eq!(outputs[1].0, MotorPort::C);
        for (_, state) in outputs {
            assert_eq!(state.regulation, Regulation::Sync);
            assert_eq!(state.turn_ratio, SYNC_TURN_RATIO);
            assert_eq!(state.power, 50);
        }
    }

    #[tokio::test]
    async fn test_zero_power_turn_is_a_no_op() {
        let locator = FakeLocator::new();
        let brick = Arc::new(locator.brick());

        Motor::new(brick, MotorPort::A).turn(0, 360).await.unwrap();
        assert!(locator.calls().is_empty());
    }
}
