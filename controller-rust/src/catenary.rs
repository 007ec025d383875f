//! Catenary approximation for a chain rode.
//!
//! First-order small-sag model: the horizontal reach of a rode is its
//! straight-line reach scaled by a reduction factor that depends on chain
//! weight and the horizontal load the wind puts on the boat. Every function
//! here is total: bad input degrades to 0 or to a clamped value.

use crate::config::PhysicsConfig;
use crate::environment::KNOT_MPS;

/// Current and hull resistance, present even in a flat calm.
pub const BASELINE_FORCE_N: f32 = 30.0;
pub const MAX_FORCE_N: f32 = 2000.0;
/// Below this load the linearized sag term is meaningless.
pub const HEAVY_SAG_FORCE_N: f32 = 50.0;
pub const MIN_REDUCTION: f32 = 0.80;
pub const MAX_REDUCTION: f32 = 0.99;

/// Horizontal load on the rode from windage plus a baseline, in newtons.
pub fn horizontal_force(wind_mps: f32, physics: &PhysicsConfig) -> f32 {
    let wind = if wind_mps.is_finite() && wind_mps > 0.01 {
        wind_mps
    } else {
        physics.default_wind_knots * KNOT_MPS
    };
    let drag = 0.5 * physics.air_density * physics.drag_coefficient * physics.windage_area_m2 * wind * wind;
    let force = drag + BASELINE_FORCE_N;
    if !force.is_finite() {
        return MAX_FORCE_N;
    }
    force.clamp(BASELINE_FORCE_N, MAX_FORCE_N)
}

/// Fraction of the straight-line reach the sagging chain actually covers.
pub fn reduction_factor(chain_length: f32, depth: f32, force: f32, physics: &PhysicsConfig) -> f32 {
    if !chain_length.is_finite() || !depth.is_finite() || !force.is_finite() {
        return MIN_REDUCTION;
    }

    if force < HEAVY_SAG_FORCE_N {
        let scope = chain_length / depth.max(1.0);
        return if scope < 3.0 {
            0.90
        } else if scope < 5.0 {
            0.85
        } else {
            0.80
        };
    }

    let straight = (chain_length * chain_length - depth * depth).max(0.0).sqrt();
    if straight <= f32::EPSILON {
        return MIN_REDUCTION;
    }

    let w = physics.chain_weight_per_meter_kg * physics.gravity;
    let sag = (w * chain_length * chain_length) / (8.0 * force);
    let factor = 1.0 - sag / straight;
    if !factor.is_finite() {
        return MIN_REDUCTION;
    }
    factor.clamp(MIN_REDUCTION, MAX_REDUCTION)
}

/// Horizontal reach of `chain_length` of rode hanging down to `depth`.
pub fn target_horizontal_distance(chain_length: f32, depth: f32, force: f32, physics: &PhysicsConfig) -> f32 {
    if !chain_length.is_finite() || !depth.is_finite() || chain_length < depth {
        return 0.0;
    }
    let straight = (chain_length * chain_length - depth * depth).sqrt();
    straight * reduction_factor(chain_length, depth, force, physics)
}

/// Shortest rode that reaches an anchor `distance` away at `depth`.
///
/// Inverts [`target_horizontal_distance`]: the reduction factor is estimated at
/// the straight-line length, then the sag-corrected length is solved for.
pub fn minimum_chain_for_distance(distance: f32, depth: f32, force: f32, physics: &PhysicsConfig) -> f32 {
    if !distance.is_finite() || distance <= 0.01 {
        return depth.max(0.0);
    }
    let straight = (distance * distance + depth * depth).sqrt();
    let factor = reduction_factor(straight, depth, force, physics);
    let reach = distance / factor;
    (reach * reach + depth * depth).sqrt()
}

/// Spare chain beyond what the current geometry needs (`>= 0` is spare).
///
/// `depth` is water depth; the bow height is added here. Returns 0 while the
/// anchor is still hanging vertically or any input is unusable.
pub fn horizontal_slack(
    chain_length: f32,
    depth: f32,
    distance: f32,
    bow_height: f32,
    force: f32,
    physics: &PhysicsConfig,
) -> f32 {
    if !chain_length.is_finite() || !depth.is_finite() || !distance.is_finite() {
        return 0.0;
    }
    if chain_length <= 0.01 || depth <= 0.01 {
        return 0.0;
    }
    let drop = depth + bow_height;
    if chain_length < drop {
        return 0.0;
    }

    let slack = chain_length - minimum_chain_for_distance(distance, drop, force, physics);
    if slack.is_finite() { slack } else { 0.0 }
}
