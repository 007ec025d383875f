//! Deterministic boat-and-windlass model shared by the integration tests.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use rode_types::{Sequence, SensorReadings, SpeedProfile, TelemetryEvent};
use tokio::sync::broadcast;
use windlass_controller::catenary;
use windlass_controller::config::PhysicsConfig;
use windlass_controller::persistence::MemorySpeedStore;
use windlass_controller::telemetry::drain;
use windlass_controller::{MemoryRelays, RelayState, Telemetry, Windlass, WindlassConfig};

pub const TICK: Duration = Duration::from_millis(10);

pub struct Vessel {
    pub rode: f32,
    pub distance: f32,
    pub depth: f32,
    pub wind: f32,
    pub bow_height: f32,
    pub down_ms_per_m: f32,
    pub up_ms_per_m: f32,
    /// Speed the boat closes on its equilibrium position.
    pub drift_mps: f32,
    /// Under power towards the anchor instead of lying back on the rode.
    pub motoring: bool,
    /// Bow rangefinder reporting; `false` reads as an absent distance.
    pub distance_sensor: bool,
    pub physics: PhysicsConfig,
}

impl Vessel {
    pub fn at_anchor(depth: f32) -> Self {
        Self {
            rode: 0.0,
            distance: 0.0,
            depth,
            wind: 4.0,
            bow_height: 2.0,
            down_ms_per_m: 700.0,
            up_ms_per_m: 1100.0,
            drift_mps: 0.5,
            motoring: false,
            distance_sensor: true,
            physics: PhysicsConfig::default(),
        }
    }

    /// Distance the boat settles at with the current rode.
    pub fn reach(&self) -> f32 {
        let force = catenary::horizontal_force(self.wind, &self.physics);
        catenary::target_horizontal_distance(self.rode, self.depth + self.bow_height, force, &self.physics)
    }

    pub fn step(&mut self, relays: RelayState, dt: Duration) {
        let ms = dt.as_secs_f32() * 1000.0;
        if relays.lower {
            self.rode += ms / self.down_ms_per_m;
        }
        if relays.raise {
            self.rode = (self.rode - ms / self.up_ms_per_m).max(0.0);
        }

        let goal = if self.motoring { 0.0 } else { self.reach() };
        let step = self.drift_mps * dt.as_secs_f32();
        self.distance = if self.distance < goal {
            (self.distance + step).min(goal)
        } else {
            (self.distance - step).max(goal)
        };
    }

    pub fn readings(&self) -> SensorReadings {
        SensorReadings {
            rode_length: self.rode,
            depth: Some(self.depth),
            distance_from_bow: self.distance_sensor.then_some(self.distance),
            wind_speed: Some(self.wind),
            tide_now: None,
            tide_high: None,
        }
    }
}

pub struct Harness {
    pub windlass: Windlass,
    pub relays: MemoryRelays,
    pub store: MemorySpeedStore,
    pub vessel: Vessel,
    pub now: Instant,
    pub events: Vec<TelemetryEvent>,
    rx: broadcast::Receiver<TelemetryEvent>,
}

impl Harness {
    pub fn new(vessel: Vessel) -> Self {
        let relays = MemoryRelays::new();
        let store = MemorySpeedStore::new();
        let telemetry = Telemetry::default();
        let rx = telemetry.subscribe();
        let windlass = Windlass::new(
            &WindlassConfig::default(),
            Box::new(relays.clone()),
            Box::new(store.clone()),
            SpeedProfile::default(),
            telemetry,
        );
        let mut h = Self {
            windlass,
            relays,
            store,
            vessel,
            now: Instant::now(),
            events: Vec::new(),
            rx,
        };
        h.windlass.poll(&h.vessel.readings(), h.now);
        h
    }

    pub fn step(&mut self) {
        self.vessel.step(self.relays.state(), TICK);
        self.now += TICK;
        self.windlass.poll(&self.vessel.readings(), self.now);
        self.collect();
    }

    /// Step until `done` holds or `limit` of virtual time passes. Returns whether `done` held.
    pub fn run_until(&mut self, limit: Duration, mut done: impl FnMut(&Harness) -> bool) -> bool {
        let deadline = self.now + limit;
        while self.now < deadline {
            self.step();
            if done(self) {
                return true;
            }
        }
        false
    }

    pub fn collect(&mut self) {
        self.events.extend(
            drain(&mut self.rx)
                .into_iter()
                .filter(|e| matches!(e, TelemetryEvent::Stage { .. } | TelemetryEvent::SequenceFinished { .. })),
        );
    }

    pub fn stage_labels(&self, sequence: Sequence) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TelemetryEvent::Stage { sequence: s, label } if *s == sequence => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn finished_count(&self, sequence: Sequence) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::SequenceFinished { sequence: s } if *s == sequence))
            .count()
    }
}
