//! Block catalog: the typed command surface the host sees.
//!
//! Each block is a method on [`Bridge`] expressed through
//! [`Bridge::guarded`], plus an entry in [`CATALOG`] describing how the host
//! should draw it and which menus it takes.

use serde_json::{json, Value};
use std::time::Duration;

use crate::bridge::Bridge;
use crate::brick::{Brick, Locator};
use crate::motor::{MotorPort, MotorSelector};
use crate::sensor::{ReadingKind, Sample, SensorInstance, SensorKind, SensorPort};

/// A finite set of string choices offered to the host.
pub trait Menu: Sized + Copy + 'static {
    const NAME: &'static str;
    const CHOICES: &'static [Self];

    fn label(self) -> &'static str;

    fn from_label(label: &str) -> Option<Self> {
        Self::CHOICES.iter().copied().find(|c| c.label() == label)
    }

    fn labels() -> Vec<&'static str> {
        Self::CHOICES.iter().map(|c| c.label()).collect()
    }
}

/// Light switch menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnOff {
    On,
    Off,
}

impl Menu for OnOff {
    const NAME: &'static str = "onoff";
    const CHOICES: &'static [Self] = &[OnOff::On, OnOff::Off];

    fn label(self) -> &'static str {
        match self {
            OnOff::On => "on",
            OnOff::Off => "off",
        }
    }
}

/// Fold a negative degree count into the power sign.
pub fn normalize_turn(degrees: f64, power: f64) -> (u32, i8) {
    if degrees < 0.0 {
        (degrees_to_u32(-degrees), clamp_power(-power))
    } else {
        (degrees_to_u32(degrees), clamp_power(power))
    }
}

fn degrees_to_u32(degrees: f64) -> u32 {
    degrees.round().clamp(0.0, f64::from(u32::MAX)) as u32
}

/// Host power percentage to the brick's -100..=100 range.
pub fn clamp_power(power: f64) -> i8 {
    if power.is_nan() {
        return 0;
    }
    power.round().clamp(-100.0, 100.0) as i8
}

/// Whole seconds from the host to tone milliseconds.
fn tone_millis(seconds: f64) -> u16 {
    (seconds * 1000.0).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

fn tone_frequency(note: f64) -> u16 {
    note.round().clamp(0.0, f64::from(u16::MAX)) as u16
}

impl<L: Locator> Bridge<L> {
    /// `turn %m.nxtMotor by %n degrees at %n% power`
    pub async fn turn_degrees(&self, motor: MotorSelector, degrees: f64, power: f64) {
        let (degrees, power) = normalize_turn(degrees, power);
        self.guarded("turn_degrees", |link| async move {
            link.motors(motor).turn(power, degrees).await
        })
        .await;
    }

    /// `turn %m.nxtMotor at %n% power`
    pub async fn turn(&self, motor: MotorSelector, power: f64) {
        let power = clamp_power(power);
        self.guarded("turn", |link| async move { link.motors(motor).run(power).await })
            .await;
    }

    /// `turn %m.nxtMotor off`
    pub async fn stop(&self, motor: MotorSelector) {
        self.guarded("stop", |link| async move { link.motors(motor).brake().await })
            .await;
    }

    /// `rotation of %m.nxtRotation`
    pub async fn motor_rotation(&self, motor: MotorPort) -> Option<i32> {
        self.guarded("motor_rotation", |link| async move {
            Ok(Some(link.motor(motor).tacho().await?.rotation_count))
        })
        .await
    }

    /// `attach %m.nxtSensor sensor to %m.nxtPort`
    pub async fn attach_sensor(&self, kind: SensorKind, port: SensorPort) {
        self.attach(port, kind).await;
    }

    /// `switch %m.onoff light on %m.nxtPort`
    pub async fn illuminate(&self, switch: OnOff, port: SensorPort) {
        self.guarded("illuminate", |link| async move {
            let sensor = match link.sensor(port, SensorKind::Light) {
                Some(bound) => bound.clone(),
                None => SensorInstance::transient_light(link.brick().clone(), port),
            };
            sensor.set_illuminated(switch == OnOff::On).await
        })
        .await;
    }

    /// `%m.nxtReporter sensor on %m.nxtPort`
    pub async fn report_sensor(&self, reading: ReadingKind, port: SensorPort) -> Option<Sample> {
        self.guarded("report_sensor", |link| async move {
            match link.sensor(port, reading.sensor()) {
                Some(sensor) => sensor.sample().await.map(Some),
                None => Ok(None),
            }
        })
        .await
    }

    /// `touch sensor on %m.nxtPort`
    pub async fn touch_sensor(&self, port: SensorPort) -> bool {
        self.guarded("touch_sensor", |link| async move {
            match link.sensor(port, SensorKind::Touch) {
                Some(sensor) => Ok(matches!(sensor.sample().await?, Sample::Touch(true))),
                None => Ok(false),
            }
        })
        .await
    }

    /// `play tone %n for %n seconds`; returns when the tone has finished.
    pub async fn tone(&self, note: f64, seconds: f64) {
        let frequency = tone_frequency(note);
        let millis = tone_millis(seconds);
        self.guarded("tone", |link| async move {
            link.brick().play_tone(frequency, millis).await?;
            tokio::time::sleep(Duration::from_millis(u64::from(millis))).await;
            Ok(())
        })
        .await;
    }

    /// Host reset: forget live sensors and zero the motor counters.
    pub async fn reset(&self) {
        self.guarded("reset", |link| async move {
            self.clear_instances().await;
            for port in MotorPort::ALL {
                link.motor(port).reset_position(false).await?;
            }
            Ok(())
        })
        .await;
    }

    /// Run a parsed host call.
    pub async fn dispatch(&self, call: Call) -> Answer {
        match call {
            Call::TurnDegrees { motor, degrees, power } => {
                self.turn_degrees(motor, degrees, power).await;
                Answer::Done
            }
            Call::Turn { motor, power } => {
                self.turn(motor, power).await;
                Answer::Done
            }
            Call::Stop { motor } => {
                self.stop(motor).await;
                Answer::Done
            }
            Call::Rotation { motor } => {
                let rotation = self.motor_rotation(motor).await;
                Answer::Value(rotation.map(|r| r.to_string()).unwrap_or_default())
            }
            Call::Attach { kind, port } => {
                self.attach_sensor(kind, port).await;
                Answer::Done
            }
            Call::Illuminate { switch, port } => {
                self.illuminate(switch, port).await;
                Answer::Done
            }
            Call::Report { reading, port } => {
                let sample = self.report_sensor(reading, port).await;
                Answer::Value(sample.map(|s| s.to_string()).unwrap_or_default())
            }
            Call::Touch { port } => Answer::Value(self.touch_sensor(port).await.to_string()),
            Call::Tone { note, seconds } => {
                self.tone(note, seconds).await;
                Answer::Done
            }
        }
    }
}

/// What a call sends back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Done,
    Value(String),
}

impl Answer {
    pub fn into_body(self) -> String {
        match self {
            Answer::Done => String::new(),
            Answer::Value(v) => v,
        }
    }
}

/// A host call with its menu arguments resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Call {
    TurnDegrees { motor: MotorSelector, degrees: f64, power: f64 },
    Turn { motor: MotorSelector, power: f64 },
    Stop { motor: MotorSelector },
    Rotation { motor: MotorPort },
    Attach { kind: SensorKind, port: SensorPort },
    Illuminate { switch: OnOff, port: SensorPort },
    Report { reading: ReadingKind, port: SensorPort },
    Touch { port: SensorPort },
    Tone { note: f64, seconds: f64 },
}

/// Why a host call could not be parsed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CallError {
    #[error("unknown block: {0}")]
    UnknownBlock(String),
    #[error("{block} expects {expected} arguments, got {got}")]
    Arity { block: &'static str, expected: usize, got: usize },
    #[error("{value:?} is not in menu {menu}")]
    NotInMenu { menu: &'static str, value: String },
    #[error("{0:?} is not a number")]
    NotANumber(String),
}

fn menu_arg<M: Menu>(value: &str) -> Result<M, CallError> {
    M::from_label(value).ok_or_else(|| CallError::NotInMenu {
        menu: M::NAME,
        value: value.to_string(),
    })
}

fn number_arg(value: &str) -> Result<f64, CallError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CallError::NotANumber(value.to_string()))
}

/// Look up a block by selector.
fn block(selector: &str) -> Option<&'static BlockSpec> {
    CATALOG.iter().find(|b| b.selector == selector)
}

impl Call {
    /// Resolve a selector and its raw arguments.
    pub fn parse(selector: &str, args: &[String]) -> Result<Self, CallError> {
        let block = block(selector).ok_or_else(|| CallError::UnknownBlock(selector.to_string()))?;
        if args.len() != block.defaults.len() {
            return Err(CallError::Arity {
                block: block.selector,
                expected: block.defaults.len(),
                got: args.len(),
            });
        }
        let a: Vec<&str> = args.iter().map(String::as_str).collect();

        Ok(match block.selector {
            "turn_degrees" => Call::TurnDegrees {
                motor: menu_arg(a[0])?,
                degrees: number_arg(a[1])?,
                power: number_arg(a[2])?,
            },
            "turn" => Call::Turn {
                motor: menu_arg(a[0])?,
                power: number_arg(a[1])?,
            },
            "stop" => Call::Stop { motor: menu_arg(a[0])? },
            "motor_rotation" => Call::Rotation { motor: menu_arg(a[0])? },
            "attach_sensor" => Call::Attach {
                kind: menu_arg(a[0])?,
                port: menu_arg(a[1])?,
            },
            "illuminate" => Call::Illuminate {
                switch: menu_arg(a[0])?,
                port: menu_arg(a[1])?,
            },
            "report_sensor" => Call::Report {
                reading: menu_arg(a[0])?,
                port: menu_arg(a[1])?,
            },
            "touch_sensor" => Call::Touch { port: menu_arg(a[0])? },
            "tone" => Call::Tone {
                note: number_arg(a[0])?,
                seconds: number_arg(a[1])?,
            },
            other => return Err(CallError::UnknownBlock(other.to_string())),
        })
    }
}

/// How the host renders and calls a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Command,
    BlockingCommand,
    Reporter,
    Predicate,
}

impl BlockKind {
    /// Scratch block type code.
    fn code(self) -> &'static str {
        match self {
            BlockKind::Command => " ",
            BlockKind::BlockingCommand => "w",
            BlockKind::Reporter => "r",
            BlockKind::Predicate => "b",
        }
    }
}

/// Default value shown in a block slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Menu(&'static str),
    Number(i64),
}

impl Slot {
    fn to_json(self) -> Value {
        match self {
            Slot::Menu(label) => json!(label),
            Slot::Number(n) => json!(n),
        }
    }
}

/// One catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct BlockSpec {
    pub kind: BlockKind,
    pub text: &'static str,
    pub selector: &'static str,
    pub defaults: &'static [Slot],
}

/// Every block the bridge offers, in palette order.
pub const CATALOG: &[BlockSpec] = &[
    BlockSpec {
        kind: BlockKind::BlockingCommand,
        text: "turn %m.nxtMotor by %n degrees at %n% power",
        selector: "turn_degrees",
        defaults: &[Slot::Menu("motor-A"), Slot::Number(360), Slot::Number(100)],
    },
    BlockSpec {
        kind: BlockKind::Command,
        text: "turn %m.nxtMotor at %n% power",
        selector: "turn",
        defaults: &[Slot::Menu("motor-A"), Slot::Number(100)],
    },
    BlockSpec {
        kind: BlockKind::Command,
        text: "turn %m.nxtMotor off",
        selector: "stop",
        defaults: &[Slot::Menu("motor-A")],
    },
    BlockSpec {
        kind: BlockKind::Reporter,
        text: "rotation of %m.nxtRotation",
        selector: "motor_rotation",
        defaults: &[Slot::Menu("motor-A")],
    },
    BlockSpec {
        kind: BlockKind::Command,
        text: "attach %m.nxtSensor sensor to %m.nxtPort",
        selector: "attach_sensor",
        defaults: &[Slot::Menu("touch"), Slot::Menu("port-1")],
    },
    BlockSpec {
        kind: BlockKind::Command,
        text: "switch %m.onoff light on %m.nxtPort",
        selector: "illuminate",
        defaults: &[Slot::Menu("on"), Slot::Menu("port-1")],
    },
    BlockSpec {
        kind: BlockKind::Reporter,
        text: "%m.nxtReporter sensor on %m.nxtPort",
        selector: "report_sensor",
        defaults: &[Slot::Menu("distance"), Slot::Menu("port-4")],
    },
    BlockSpec {
        kind: BlockKind::Predicate,
        text: "touch sensor on %m.nxtPort",
        selector: "touch_sensor",
        defaults: &[Slot::Menu("port-1")],
    },
    BlockSpec {
        kind: BlockKind::BlockingCommand,
        text: "play tone %n for %n seconds",
        selector: "tone",
        defaults: &[Slot::Number(500), Slot::Number(1)],
    },
];

/// Whether `selector` names a long-running block. The host tags those
/// calls with a job id and polls until the job leaves the busy list.
pub fn is_blocking(selector: &str) -> bool {
    block(selector).is_some_and(|b| b.kind == BlockKind::BlockingCommand)
}

/// Menu name to choices.
pub fn menus() -> serde_json::Map<String, Value> {
    let mut menus = serde_json::Map::new();
    let mut add = |name: &str, labels: Vec<&'static str>| {
        menus.insert(name.to_string(), json!(labels));
    };
    add(OnOff::NAME, OnOff::labels());
    add(MotorPort::NAME, MotorPort::labels());
    add(MotorSelector::NAME, MotorSelector::labels());
    add(SensorPort::NAME, SensorPort::labels());
    add(SensorKind::NAME, SensorKind::labels());
    add(ReadingKind::NAME, ReadingKind::labels());
    menus
}

/// Extension descriptor the host loads to learn the blocks.
pub fn descriptor(name: &str, port: u16) -> Value {
    let block_specs: Vec<Value> = CATALOG
        .iter()
        .map(|block| {
            let mut entry = vec![
                json!(block.kind.code()),
                json!(block.text),
                json!(block.selector),
            ];
            entry.extend(block.defaults.iter().map(|slot| slot.to_json()));
            Value::Array(entry)
        })
        .collect();

    json!({
        "extensionName": name,
        "extensionPort": port,
        "blockSpecs": block_specs,
        "menus": menus(),
    })
}
