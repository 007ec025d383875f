//! protocol.rs — daemon line protocol.
//!
//! Each input line is either an operator command (`raise5`, `autoDrop 6`, …)
//! or a sensor update `set <field> <value>`, where the value may be `nan` or
//! `none` to mark the source as absent.

use std::str::FromStr;

use thiserror::Error;

use rode_types::{Command, CommandError, Reading, SensorReadings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorField {
    Rode,
    Depth,
    Distance,
    Wind,
    TideNow,
    TideHigh,
}

impl FromStr for SensorField {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rode" => Ok(SensorField::Rode),
            "depth" => Ok(SensorField::Depth),
            "distance" => Ok(SensorField::Distance),
            "wind" => Ok(SensorField::Wind),
            "tide_now" => Ok(SensorField::TideNow),
            "tide_high" => Ok(SensorField::TideHigh),
            other => Err(InputError::UnknownField(other.to_string())),
        }
    }
}

impl SensorField {
    pub fn apply(self, readings: &mut SensorReadings, value: Reading) {
        match self {
            // The rode counter always reports something; absent reads as NaN and is ignored downstream.
            SensorField::Rode => readings.rode_length = value.unwrap_or(f32::NAN),
            SensorField::Depth => readings.depth = value,
            SensorField::Distance => readings.distance_from_bow = value,
            SensorField::Wind => readings.wind_speed = value,
            SensorField::TideNow => readings.tide_now = value,
            SensorField::TideHigh => readings.tide_high = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Input {
    Command(Command),
    Set(SensorField, Reading),
}

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("unknown sensor field '{0}'")]
    UnknownField(String),
    #[error("expected `set <field> <value>`")]
    MalformedSet,
    #[error("invalid sensor value '{0}'")]
    InvalidValue(String),
}

fn parse_value(s: &str) -> Result<Reading, InputError> {
    match s.to_ascii_lowercase().as_str() {
        "none" | "nan" => Ok(None),
        _ => s
            .parse::<f32>()
            .map(Some)
            .map_err(|_| InputError::InvalidValue(s.to_string())),
    }
}

/// Parse one line; blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Input>, InputError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut words = line.split_whitespace();
    if words.next().is_some_and(|w| w.eq_ignore_ascii_case("set")) {
        let (Some(field), Some(value), None) = (words.next(), words.next(), words.next()) else {
            return Err(InputError::MalformedSet);
        };
        return Ok(Some(Input::Set(field.parse()?, parse_value(value)?)));
    }

    Ok(Some(Input::Command(line.parse()?)))
}
