//! vessel_sim.rs — boat and windlass physics
//!
//! A boat lying to its rode in a breeze: the wind pushes it downwind until the
//! catenary-limited reach of the deployed chain is met, and the chain pulls it
//! back slowly when the rode is shortened. Under power the boat closes on the
//! anchor instead. The windlass moves chain at its true speed whenever a relay
//! is energized. Instruments see the result through gaussian noise and, in
//! the dropout preset, intermittent loss.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use rode_types::SensorReadings;
use windlass_controller::catenary;
use windlass_controller::config::PhysicsConfig;
use windlass_controller::RelayState;

use crate::scenarios::ScenarioConfig;

/// Gust filter time constant.
const GUST_TAU_S: f32 = 5.0;

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub true_down_ms_per_meter: f32,
    pub true_up_ms_per_meter: f32,
    pub wind_mps: f32,
    pub gust_sigma_mps: f32,
    pub drift_rate_mps: f32,
    pub relax_rate_mps: f32,
    pub motor_mps: f32,
    pub depth_m: f32,
    pub tide_now_m: f32,
    pub tide_high_m: f32,
    pub distance_sigma_m: f32,
    pub depth_sigma_m: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            true_down_ms_per_meter: 700.0,
            true_up_ms_per_meter: 1100.0,
            wind_mps: 6.0,
            gust_sigma_mps: 1.0,
            drift_rate_mps: 0.6,
            relax_rate_mps: 0.15,
            motor_mps: 0.5,
            depth_m: 8.0,
            tide_now_m: 0.0,
            tide_high_m: 0.0,
            distance_sigma_m: 0.15,
            depth_sigma_m: 0.05,
        }
    }
}

fn noise(rng: &mut StdRng, sigma: f32) -> f32 {
    Normal::new(0.0, sigma.max(0.0))
        .map(|n| n.sample(rng))
        .unwrap_or(0.0)
}

// ── Vessel ────────────────────────────────────────────────────────────────────

pub struct VesselSim {
    cfg: SimConfig,
    scenario: ScenarioConfig,
    physics: PhysicsConfig,
    bow_height: f32,
    rng: StdRng,

    pub rode: f32,
    pub distance: f32,
    pub wind: f32,
    pub motoring: bool,
}

impl VesselSim {
    pub fn new(cfg: SimConfig, scenario: ScenarioConfig, physics: PhysicsConfig, bow_height: f32, seed: u64) -> Self {
        let wind = cfg.wind_mps * scenario.wind_multiplier;
        Self {
            cfg,
            scenario,
            physics,
            bow_height,
            rng: StdRng::seed_from_u64(seed),
            rode: 0.0,
            distance: 0.0,
            wind,
            motoring: false,
        }
    }

    /// Horizontal distance the boat settles at with the rode it has out.
    pub fn reach(&self) -> f32 {
        let force = catenary::horizontal_force(self.wind, &self.physics);
        catenary::target_horizontal_distance(self.rode, self.cfg.depth_m + self.bow_height, force, &self.physics)
    }

    /// Start with `rode` out and the boat already lying back on it.
    pub fn lie_back(&mut self, rode: f32) {
        self.rode = rode.max(0.0);
        self.distance = self.reach();
    }

    pub fn tick(&mut self, relays: RelayState, dt: Duration) {
        let secs = dt.as_secs_f32();
        let ms = secs * 1000.0;

        if relays.lower && !relays.raise {
            self.rode += ms / self.cfg.true_down_ms_per_meter;
        } else if relays.raise && !relays.lower {
            self.rode = (self.rode - ms / self.cfg.true_up_ms_per_meter).max(0.0);
        }

        // First-order gusts around the mean wind.
        let mean = self.cfg.wind_mps * self.scenario.wind_multiplier;
        let sigma = self.cfg.gust_sigma_mps * self.scenario.gust_multiplier;
        let sample = (mean + noise(&mut self.rng, sigma)).max(0.0);
        self.wind += (sample - self.wind) * (secs / GUST_TAU_S).min(1.0);

        let goal = if self.motoring { 0.0 } else { self.reach() };
        let rate = if self.distance < goal {
            self.cfg.drift_rate_mps
        } else if self.motoring {
            self.cfg.motor_mps
        } else {
            self.cfg.relax_rate_mps
        };
        let step = rate * secs;
        self.distance = if self.distance < goal {
            (self.distance + step).min(goal)
        } else {
            (self.distance - step).max(goal)
        };
    }

    fn maybe_drop(&mut self, value: f32) -> Option<f32> {
        let p = self.scenario.dropout_probability;
        if p > 0.0 && self.rng.gen_bool(p.min(1.0)) {
            // Half the dropouts are silence, half are garbage.
            if self.rng.gen_bool(0.5) { None } else { Some(f32::NAN) }
        } else {
            Some(value)
        }
    }

    /// What the instruments report this tick.
    pub fn readings(&mut self) -> SensorReadings {
        let k = self.scenario.noise_multiplier;
        let depth = self.cfg.depth_m + noise(&mut self.rng, self.cfg.depth_sigma_m * k);
        let distance = (self.distance + noise(&mut self.rng, self.cfg.distance_sigma_m * k)).max(0.0);
        let tide_now = self.cfg.tide_now_m;
        let tide_high = self.cfg.tide_high_m;
        let wind = self.wind;
        SensorReadings {
            rode_length: self.rode,
            depth: self.maybe_drop(depth),
            distance_from_bow: self.maybe_drop(distance),
            wind_speed: Some(wind),
            tide_now: Some(tide_now),
            tide_high: Some(tide_high),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::Scenario;

    fn sim(scenario: Scenario) -> VesselSim {
        VesselSim::new(SimConfig::default(), scenario.config(), PhysicsConfig::default(), 2.0, 42)
    }

    const TICK: Duration = Duration::from_millis(10);

    #[test]
    fn relays_move_chain_at_true_speed() {
        let mut v = sim(Scenario::Calm);
        let lower = RelayState { lower: true, raise: false };
        for _ in 0..70 {
            v.tick(lower, TICK);
        }
        // 700 ms at 700 ms/m
        assert!((v.rode - 1.0).abs() < 1e-3, "rode={}", v.rode);

        let raise = RelayState { lower: false, raise: true };
        for _ in 0..1000 {
            v.tick(raise, TICK);
        }
        assert_eq!(v.rode, 0.0);
    }

    #[test]
    fn boat_drifts_back_to_reach_and_no_further() {
        let mut v = sim(Scenario::Calm);
        v.rode = 30.0;
        for _ in 0..20_000 {
            v.tick(RelayState::default(), TICK);
        }
        let reach = v.reach();
        assert!(reach > 0.0);
        assert!((v.distance - reach).abs() < 0.5, "distance={} reach={reach}", v.distance);
    }

    #[test]
    fn motoring_closes_on_the_anchor() {
        let mut v = sim(Scenario::Calm);
        v.lie_back(30.0);
        v.motoring = true;
        for _ in 0..20_000 {
            v.tick(RelayState::default(), TICK);
        }
        assert_eq!(v.distance, 0.0);
    }

    #[test]
    fn calm_readings_are_always_present() {
        let mut v = sim(Scenario::Calm);
        for _ in 0..100 {
            let r = v.readings();
            assert!(r.depth.is_some_and(f32::is_finite));
            assert!(r.distance_from_bow.is_some_and(f32::is_finite));
        }
    }

    #[test]
    fn dropout_preset_loses_some_readings() {
        let mut v = sim(Scenario::SensorDropout);
        let lost = (0..500)
            .map(|_| v.readings())
            .filter(|r| !r.depth.is_some_and(f32::is_finite))
            .count();
        assert!(lost > 20 && lost < 250, "lost={lost}");
    }
}
