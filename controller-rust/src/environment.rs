//! Validated view of the environment sources.
//!
//! Every source may go stale or report garbage at any moment. Readings are
//! never rejected: an invalid value is replaced by a neutral substitute and
//! the control loop carries on.

use rode_types::SensorReadings;

use crate::config::PhysicsConfig;

/// One knot in meters per second.
pub const KNOT_MPS: f32 = 0.514_444;

/// Anything at or below this is treated as "no reading".
const MIN_VALID: f32 = 0.01;

fn valid(reading: Option<f32>) -> Option<f32> {
    reading.filter(|v| v.is_finite() && *v > MIN_VALID)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvironmentSnapshot {
    depth: Option<f32>,
    distance: Option<f32>,
    wind_speed: Option<f32>,
    tide_now: Option<f32>,
    tide_high: Option<f32>,
}

impl EnvironmentSnapshot {
    pub fn from_readings(r: &SensorReadings) -> Self {
        Self {
            depth: valid(r.depth),
            distance: valid(r.distance_from_bow),
            wind_speed: valid(r.wind_speed),
            tide_now: valid(r.tide_now),
            tide_high: valid(r.tide_high),
        }
    }

    /// Water depth below the surface, 0 when unknown.
    pub fn depth(&self) -> f32 {
        self.depth.unwrap_or(0.0)
    }

    pub fn has_depth(&self) -> bool {
        self.depth.is_some()
    }

    /// Horizontal distance bow → anchor, 0 when unknown.
    pub fn distance(&self) -> f32 {
        self.distance.unwrap_or(0.0)
    }

    pub fn has_distance(&self) -> bool {
        self.distance.is_some()
    }

    /// Apparent wind in m/s, or the configured default when unknown.
    pub fn wind_speed(&self, physics: &PhysicsConfig) -> f32 {
        self.wind_speed
            .unwrap_or(physics.default_wind_knots * KNOT_MPS)
    }

    pub fn tide_now(&self) -> f32 {
        self.tide_now.unwrap_or(0.0)
    }

    pub fn tide_high(&self) -> f32 {
        self.tide_high.unwrap_or(0.0)
    }

    /// Depth the anchor will see at high water.
    pub fn tide_adjusted_depth(&self) -> f32 {
        let depth = self.depth();
        if self.tide_now.is_none() && self.tide_high.is_none() {
            return depth;
        }
        (depth - self.tide_now() + self.tide_high()).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(depth: Option<f32>, tide_now: Option<f32>, tide_high: Option<f32>) -> SensorReadings {
        SensorReadings {
            rode_length: 0.0,
            depth,
            distance_from_bow: Some(f32::INFINITY),
            wind_speed: Some(0.0),
            tide_now,
            tide_high,
        }
    }

    #[test]
    fn invalid_readings_become_neutral() {
        let env = EnvironmentSnapshot::from_readings(&readings(Some(f32::NAN), None, None));
        assert_eq!(env.depth(), 0.0);
        assert!(!env.has_depth());
        assert_eq!(env.distance(), 0.0);
        let physics = PhysicsConfig::default();
        assert!((env.wind_speed(&physics) - 10.0 * KNOT_MPS).abs() < 1e-4);
    }

    #[test]
    fn tide_adjustment_uses_high_water() {
        let env = EnvironmentSnapshot::from_readings(&readings(Some(8.0), Some(1.0), Some(3.0)));
        assert_eq!(env.tide_adjusted_depth(), 10.0);
    }

    #[test]
    fn tide_adjustment_falls_back_to_raw_depth() {
        let env = EnvironmentSnapshot::from_readings(&readings(Some(8.0), None, Some(f32::NAN)));
        assert_eq!(env.tide_adjusted_depth(), 8.0);
    }

    #[test]
    fn tide_adjustment_never_negative() {
        let env = EnvironmentSnapshot::from_readings(&readings(Some(1.0), Some(4.0), None));
        assert_eq!(env.tide_adjusted_depth(), 0.0);
    }
}
