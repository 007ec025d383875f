//! Controller configuration, loaded from `config.toml`.
//!
//! Every section is optional; missing keys fall back to the defaults below,
//! which mirror the values the windlass was commissioned with.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Embedded default configuration, used when no file is supplied.
pub const DEFAULT_CONFIG: &str = include_str!("../../config.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WindlassConfig {
    pub actuator: ActuatorConfig,
    pub physics: PhysicsConfig,
    pub deployment: DeploymentConfig,
    pub retrieval: RetrievalConfig,
    pub daemon: DaemonConfig,
}

// ── [actuator] ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub min_length_m: f32,
    pub max_length_m: f32,
    /// Lowering never commands past this length, even when `max_length_m` is larger.
    pub stop_before_max_m: f32,
    /// Bow roller to waterline.
    pub bow_height_m: f32,
    /// Final-pull zone is `rode <= depth + bow_height + final_pull_margin`.
    pub final_pull_margin_m: f32,
    /// Raising pauses below this slack...
    pub pause_slack_m: f32,
    /// ...and resumes once slack is back above this.
    pub resume_slack_m: f32,
    pub slack_cooldown_ms: u64,
    /// Added on top of the expected travel time.
    pub timeout_margin_ms: u64,
    /// Used when the expected travel time cannot be computed.
    pub fallback_timeout_ms: u64,
    /// EWMA weight of the newest speed sample.
    pub speed_smoothing: f32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            min_length_m: 2.0,
            max_length_m: 80.0,
            stop_before_max_m: 75.0,
            bow_height_m: 2.0,
            final_pull_margin_m: 3.0,
            pause_slack_m: 0.2,
            resume_slack_m: 1.0,
            slack_cooldown_ms: 3000,
            timeout_margin_ms: 5000,
            fallback_timeout_ms: 10_000,
            speed_smoothing: 0.2,
        }
    }
}

// ── [physics] ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Submerged chain weight.
    pub chain_weight_per_meter_kg: f32,
    pub air_density: f32,
    pub drag_coefficient: f32,
    pub windage_area_m2: f32,
    /// Substituted when the wind reading is missing.
    pub default_wind_knots: f32,
    pub gravity: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            chain_weight_per_meter_kg: 2.2,
            air_density: 1.225,
            drag_coefficient: 1.2,
            windage_area_m2: 15.0,
            default_wind_knots: 10.0,
            gravity: 9.81,
        }
    }
}

// ── [deployment] ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub default_scope: f32,
    pub min_scope: f32,
    pub max_scope: f32,
    pub min_depth_m: f32,
    pub max_depth_m: f32,
    pub min_total_chain_m: f32,
    /// Extra rode paid out past the vertical drop in the first stage.
    pub initial_drop_slack_m: f32,
    pub first_stage_ratio: f32,
    pub second_stage_ratio: f32,
    pub hold_drop_ms: u64,
    pub hold_first_ms: u64,
    pub hold_second_ms: u64,
    /// Slack below which the rode counts as taut when distance is unavailable.
    pub taut_slack_m: f32,
    /// Monitor pauses paying out above `pause_ratio * depth` of slack.
    pub pause_slack_depth_ratio: f32,
    pub resume_slack_depth_ratio: f32,
    pub tick_ms: u64,
    pub monitor_ms: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            default_scope: 5.0,
            min_scope: 3.0,
            max_scope: 10.0,
            min_depth_m: 3.0,
            max_depth_m: 45.0,
            min_total_chain_m: 10.0,
            initial_drop_slack_m: 2.0,
            first_stage_ratio: 0.40,
            second_stage_ratio: 0.80,
            hold_drop_ms: 2_000,
            hold_first_ms: 30_000,
            hold_second_ms: 75_000,
            taut_slack_m: 0.5,
            pause_slack_depth_ratio: 1.2,
            resume_slack_depth_ratio: 0.6,
            tick_ms: 10,
            monitor_ms: 500,
        }
    }
}

// ── [retrieval] ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub completion_threshold_m: f32,
    pub final_pull_threshold_m: f32,
    pub resume_slack_ratio: f32,
    pub min_raise_amount_m: f32,
    pub cooldown_after_raise_ms: u64,
    pub tick_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            completion_threshold_m: 2.0,
            final_pull_threshold_m: 10.0,
            resume_slack_ratio: 0.3,
            min_raise_amount_m: 1.0,
            cooldown_after_raise_ms: 3000,
            tick_ms: 100,
        }
    }
}

// ── [daemon] ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Actuator control period.
    pub tick_ms: u64,
    pub speeds_file: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            speeds_file: "speeds.json".to_string(),
        }
    }
}

impl WindlassConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: WindlassConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read `path`, falling back to the embedded defaults when it cannot be read.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                info!("Loaded config from {}", path.display());
                Self::from_toml_str(&text)
            }
            Err(e) => {
                warn!("Cannot read {} ({e}), using embedded defaults", path.display());
                Self::from_toml_str(DEFAULT_CONFIG)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.actuator;
        if a.min_length_m >= a.max_length_m {
            return Err(ConfigError::Invalid(format!(
                "min_length_m ({}) must be below max_length_m ({})",
                a.min_length_m, a.max_length_m
            )));
        }
        if a.stop_before_max_m > a.max_length_m || a.stop_before_max_m <= a.min_length_m {
            return Err(ConfigError::Invalid(format!(
                "stop_before_max_m ({}) must lie in ({}, {}]",
                a.stop_before_max_m, a.min_length_m, a.max_length_m
            )));
        }
        if a.pause_slack_m >= a.resume_slack_m {
            return Err(ConfigError::Invalid(
                "actuator pause_slack_m must be below resume_slack_m".into(),
            ));
        }
        if !(0.0..=1.0).contains(&a.speed_smoothing) || a.speed_smoothing == 0.0 {
            return Err(ConfigError::Invalid("speed_smoothing must be in (0, 1]".into()));
        }
        let d = &self.deployment;
        if d.min_scope > d.max_scope {
            return Err(ConfigError::Invalid("min_scope must not exceed max_scope".into()));
        }
        if d.resume_slack_depth_ratio >= d.pause_slack_depth_ratio {
            return Err(ConfigError::Invalid(
                "deployment resume ratio must be below pause ratio".into(),
            ));
        }
        if d.tick_ms == 0 || d.monitor_ms == 0 || self.retrieval.tick_ms == 0 || self.daemon.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick periods must be non-zero".into()));
        }
        Ok(())
    }
}
