//! scenarios.rs — environment presets for the simulator
//!
//! Each preset stresses one part of the controller: steady conditions, a
//! gusty anchorage that keeps the slack estimate moving, or flaky instruments
//! that keep dropping out.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Steady breeze, clean instruments
    Calm,
    /// Stronger mean wind with large gusts
    Gusty,
    /// Depth and distance sources intermittently report nothing or garbage
    #[value(name = "sensor_dropout")]
    SensorDropout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    pub wind_multiplier: f32,
    pub gust_multiplier: f32,
    pub noise_multiplier: f32,
    /// Chance per reading that a depth or distance source is missing.
    pub dropout_probability: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Scenario::Calm.config()
    }
}

impl Scenario {
    pub fn config(self) -> ScenarioConfig {
        match self {
            Scenario::Calm => ScenarioConfig {
                wind_multiplier: 1.0,
                gust_multiplier: 0.5,
                noise_multiplier: 1.0,
                dropout_probability: 0.0,
            },
            Scenario::Gusty => ScenarioConfig {
                wind_multiplier: 1.6,
                gust_multiplier: 3.0,
                noise_multiplier: 1.5,
                dropout_probability: 0.0,
            },
            Scenario::SensorDropout => ScenarioConfig {
                wind_multiplier: 1.0,
                gust_multiplier: 1.0,
                noise_multiplier: 2.0,
                dropout_probability: 0.2,
            },
        }
    }
}
