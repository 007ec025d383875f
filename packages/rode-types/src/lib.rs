//! # rode-types
//!
//! Shared types for the windlass autopilot.
//!
//! These types are used by:
//! - `controller-rust`: the actuator, the two sequencers and the `windlassd` daemon
//! - `packages/rode-simulator`: the vessel/windlass physics harness
//!
//! ## Conventions
//!
//! - All lengths are meters, all speeds of the windlass are milliseconds per meter.
//! - Wind speed is meters per second (the unit the instrument bus reports).
//! - Rode length grows when chain is paid out and shrinks when it is recovered.
//! - Slack is `deployed chain − minimum chain needed`; `>= 0` means spare chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Readings ──────────────────────────────────────────────────────────────────

/// Raw value from an environment source. `None` when the source never reported.
pub type Reading = Option<f32>;

/// One poll of every external source, taken at the top of a control tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    /// Externally owned rode counter (meters deployed).
    pub rode_length: f32,
    pub depth: Reading,
    pub distance_from_bow: Reading,
    pub wind_speed: Reading,
    pub tide_now: Reading,
    pub tide_high: Reading,
}

// ── Motion ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Lowering,
    Raising,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Lowering => write!(f, "lowering"),
            Direction::Raising => write!(f, "raising"),
        }
    }
}

/// Default windlass speed before any calibration: one second per meter.
pub const DEFAULT_MS_PER_METER: f32 = 1000.0;

/// Calibrated windlass speed, one entry per direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedProfile {
    pub up_ms_per_meter: f32,
    pub down_ms_per_meter: f32,
}

impl Default for SpeedProfile {
    fn default() -> Self {
        Self {
            up_ms_per_meter: DEFAULT_MS_PER_METER,
            down_ms_per_meter: DEFAULT_MS_PER_METER,
        }
    }
}

impl SpeedProfile {
    pub fn for_direction(&self, direction: Direction) -> f32 {
        match direction {
            Direction::Lowering => self.down_ms_per_meter,
            Direction::Raising => self.up_ms_per_meter,
        }
    }

    pub fn for_direction_mut(&mut self, direction: Direction) -> &mut f32 {
        match direction {
            Direction::Lowering => &mut self.down_ms_per_meter,
            Direction::Raising => &mut self.up_ms_per_meter,
        }
    }

    /// Replace any non-finite or non-positive entry with the default speed.
    pub fn sanitized(self) -> Self {
        let fix = |v: f32| if v.is_finite() && v > 0.0 { v } else { DEFAULT_MS_PER_METER };
        Self {
            up_ms_per_meter: fix(self.up_ms_per_meter),
            down_ms_per_meter: fix(self.down_ms_per_meter),
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Textual command surface: `drop`, `raise<m>`, `lower<m>`, `autoDrop<scope>`,
/// `autoRetrieve`, `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Command {
    /// Pay out enough rode to put the anchor on the bottom.
    Drop,
    Raise { meters: f32 },
    Lower { meters: f32 },
    /// `None` uses the configured default scope.
    AutoDrop { scope: Option<f32> },
    AutoRetrieve,
    Stop,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("invalid amount {value:?} for {command}")]
    InvalidAmount { command: &'static str, value: String },
}

fn parse_amount(command: &'static str, rest: &str) -> Result<f32, CommandError> {
    let invalid = || CommandError::InvalidAmount {
        command,
        value: rest.to_string(),
    };
    let value: f32 = rest.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok(value)
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(CommandError::Empty);
        }
        let lower = text.to_ascii_lowercase();

        // Longest keywords first: "autodrop" shares a suffix with "drop".
        if let Some(rest) = lower.strip_prefix("autoretrieve") {
            if rest.trim().is_empty() {
                return Ok(Command::AutoRetrieve);
            }
        } else if let Some(rest) = lower.strip_prefix("autodrop") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(Command::AutoDrop { scope: None });
            }
            return parse_amount("autoDrop", rest).map(|v| Command::AutoDrop { scope: Some(v) });
        } else if let Some(rest) = lower.strip_prefix("raise") {
            return parse_amount("raise", rest.trim()).map(|meters| Command::Raise { meters });
        } else if let Some(rest) = lower.strip_prefix("lower") {
            return parse_amount("lower", rest.trim()).map(|meters| Command::Lower { meters });
        } else if lower == "drop" {
            return Ok(Command::Drop);
        } else if lower == "stop" {
            return Ok(Command::Stop);
        }

        Err(CommandError::Unknown(text.to_string()))
    }
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sequence {
    Deployment,
    Retrieval,
}

/// Everything the controller publishes. Serialized as one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    HorizontalSlack { meters: f32 },
    Stage { sequence: Sequence, label: String },
    SequenceFinished { sequence: Sequence },
    RelayChanged { lower: bool, raise: bool },
    SpeedCalibrated { direction: Direction, ms_per_meter: f32 },
}
