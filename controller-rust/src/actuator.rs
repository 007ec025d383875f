//! Position actuator — drives the windlass relays to absolute rode targets.
//!
//! Owns the two relays, the movement timeout, the self-calibrating speed
//! model and the published horizontal slack. Knows nothing about the
//! sequencers that command it.
//!
//! Safety rules enforced here:
//! - the opposite relay is always released before a relay is energized
//! - every move carries a finite timeout and is force-stopped when it expires
//! - every path out of a move (target, limit, stop, timeout) releases both relays

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use rode_types::{Direction, SpeedProfile, TelemetryEvent};

use crate::catenary;
use crate::config::{ActuatorConfig, PhysicsConfig};
use crate::environment::EnvironmentSnapshot;
use crate::persistence::SpeedStore;
use crate::relay::{Relay, RelayDriver, RelayState};
use crate::telemetry::Telemetry;

/// Moves shorter than this (or faster than [`MIN_CALIBRATION_MS`]) are too noisy to learn from.
const MIN_CALIBRATION_DISTANCE_M: f32 = 0.01;
const MIN_CALIBRATION_MS: u128 = 100;
/// Published slack only changes when the new value differs by more than this.
const SLACK_PUBLISH_HYSTERESIS_M: f32 = 0.01;
/// Ceiling on the expected travel time a timeout is sized from.
const MAX_EXPECTED_MOVE_MS: u64 = 30 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCommand {
    pub direction: Direction,
    pub target: f32,
    pub started_at: Instant,
    pub start_position: f32,
    pub timeout: Duration,
    /// Relay time lost to slack pauses that have ended.
    pub paused_for: Duration,
    pub paused_since: Option<Instant>,
}

impl MotionCommand {
    /// Time the relay has actually been driving since the move began.
    pub fn driven_for(&self, now: Instant) -> Duration {
        let open = self
            .paused_since
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        now.saturating_duration_since(self.started_at)
            .saturating_sub(self.paused_for.saturating_add(open))
    }
}

fn relay_for(direction: Direction) -> Relay {
    match direction {
        Direction::Lowering => Relay::Lower,
        Direction::Raising => Relay::Raise,
    }
}

pub struct PositionActuator {
    cfg: ActuatorConfig,
    physics: PhysicsConfig,
    relays: Box<dyn RelayDriver>,
    relay_state: RelayState,
    store: Box<dyn SpeedStore>,
    telemetry: Telemetry,
    speeds: SpeedProfile,
    motion: Option<MotionCommand>,
    last_timeout: Duration,

    rode_length: f32,
    env: EnvironmentSnapshot,
    slack: f32,

    // Slack-pause bookkeeping while raising
    slack_paused: bool,
    last_slack_action: Option<Instant>,
}

impl PositionActuator {
    pub fn new(
        cfg: ActuatorConfig,
        physics: PhysicsConfig,
        relays: Box<dyn RelayDriver>,
        store: Box<dyn SpeedStore>,
        speeds: SpeedProfile,
        telemetry: Telemetry,
    ) -> Self {
        let mut actuator = Self {
            last_timeout: Duration::from_millis(cfg.fallback_timeout_ms),
            cfg,
            physics,
            relays,
            relay_state: RelayState::default(),
            store,
            telemetry,
            speeds: speeds.sanitized(),
            motion: None,
            rode_length: 0.0,
            env: EnvironmentSnapshot::default(),
            slack: 0.0,
            slack_paused: false,
            last_slack_action: None,
        };
        // Relays off at startup, whatever state the hardware came up in.
        actuator.relays.write(Relay::Raise, false);
        actuator.relays.write(Relay::Lower, false);
        info!(
            "Actuator ready: limits [{:.1}, {:.1}] m, stop before {:.1} m, speeds up {:.0} / down {:.0} ms/m",
            actuator.cfg.min_length_m,
            actuator.cfg.max_length_m,
            actuator.cfg.stop_before_max_m,
            actuator.speeds.up_ms_per_meter,
            actuator.speeds.down_ms_per_meter
        );
        actuator
    }

    // ── Readings ─────────────────────────────────────────────────────────────

    /// Refresh the rode length and environment. Called once at the top of every tick.
    pub fn observe(&mut self, rode_length: f32, env: EnvironmentSnapshot) {
        if rode_length.is_finite() {
            self.rode_length = rode_length;
        } else {
            warn!("Ignoring non-finite rode length {rode_length}");
        }
        self.env = env;
    }

    pub fn rode_length(&self) -> f32 {
        self.rode_length
    }

    pub fn environment(&self) -> &EnvironmentSnapshot {
        &self.env
    }

    pub fn config(&self) -> &ActuatorConfig {
        &self.cfg
    }

    pub fn physics(&self) -> &PhysicsConfig {
        &self.physics
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    pub fn lower_anchor(&mut self, amount: f32, now: Instant) {
        self.begin(Direction::Lowering, amount, now);
    }

    pub fn raise_anchor(&mut self, amount: f32, now: Instant) {
        self.begin(Direction::Raising, amount, now);
    }

    fn clamp_target(&self, direction: Direction, current: f32, amount: f32) -> f32 {
        let (requested, upper) = match direction {
            Direction::Lowering => (
                current + amount,
                self.cfg.max_length_m.min(self.cfg.stop_before_max_m),
            ),
            Direction::Raising => (current - amount, self.cfg.max_length_m),
        };
        let upper = upper.max(self.cfg.min_length_m);
        let target = requested.clamp(self.cfg.min_length_m, upper);
        if target != requested {
            warn!(
                "{direction}: requested target {requested:.2} m outside [{:.2}, {upper:.2}] m, limited to {target:.2} m",
                self.cfg.min_length_m
            );
        }
        target
    }

    fn movement_timeout(&self, distance: f32, ms_per_meter: f32) -> Duration {
        if ms_per_meter.is_finite() && distance.is_finite() && ms_per_meter > 0.01 && distance > 0.01 {
            let expected_ms = (f64::from(distance) * f64::from(ms_per_meter)).min(MAX_EXPECTED_MOVE_MS as f64) as u64;
            Duration::from_millis(expected_ms.saturating_add(self.cfg.timeout_margin_ms))
        } else {
            Duration::from_millis(self.cfg.fallback_timeout_ms)
        }
    }

    fn begin(&mut self, direction: Direction, amount: f32, now: Instant) {
        let amount = if amount.is_finite() && amount > 0.0 { amount } else { 0.0 };
        let current = self.rode_length;

        // A new command supersedes the running one; learn from what it did so far.
        if let Some(previous) = self.motion.take() {
            self.calibrate(&previous, now);
        }

        let target = self.clamp_target(direction, current, amount);
        let timeout = self.movement_timeout((target - current).abs(), self.speeds.for_direction(direction));
        self.last_timeout = timeout;
        self.motion = Some(MotionCommand {
            direction,
            target,
            started_at: now,
            start_position: current,
            timeout,
            paused_for: Duration::ZERO,
            paused_since: None,
        });

        if direction == Direction::Raising {
            self.slack_paused = false;
            self.last_slack_action = None;
        }

        info!(
            "{direction} to {target:.2} m (requested {amount:.2} m from {current:.2} m, timeout {} ms)",
            timeout.as_millis()
        );

        self.energize(relay_for(direction));
        self.control(current, now);
    }

    /// Evaluate the running move against the latest position.
    pub fn control(&mut self, current: f32, now: Instant) {
        let Some(motion) = self.motion else {
            return;
        };
        if current.is_finite() {
            self.rode_length = current;
        }

        let elapsed = now.saturating_duration_since(motion.started_at);
        if elapsed > motion.timeout {
            warn!(
                "⚠ {} timed out after {} ms at {:.2} m (target {:.2} m), forcing stop",
                motion.direction,
                elapsed.as_millis(),
                self.rode_length,
                motion.target
            );
            self.stop(now);
            return;
        }

        let position = self.rode_length;
        match motion.direction {
            Direction::Lowering => {
                if position >= motion.target || position >= self.cfg.stop_before_max_m {
                    debug!("Lowering target reached, stopping at {position:.2} m");
                    self.stop(now);
                } else {
                    self.energize(Relay::Lower);
                }
            }
            Direction::Raising => {
                if position <= motion.target || position <= self.cfg.min_length_m {
                    debug!("Raising target reached, stopping at {position:.2} m");
                    self.stop(now);
                } else if self.in_final_pull_zone() {
                    // Near vertical the slack estimate is meaningless.
                    self.slack_paused = false;
                    self.end_pause(now);
                    self.energize(Relay::Raise);
                } else {
                    self.raise_with_slack_hysteresis(now);
                }
            }
        }
    }

    fn raise_with_slack_hysteresis(&mut self, now: Instant) {
        let cooldown = Duration::from_millis(self.cfg.slack_cooldown_ms);
        let cooled = self
            .last_slack_action
            .map_or(true, |t| now.saturating_duration_since(t) >= cooldown);

        if !self.slack_paused && self.slack < self.cfg.pause_slack_m && cooled {
            info!("Slack {:.2} m below {:.2} m, pausing raise", self.slack, self.cfg.pause_slack_m);
            self.release_all();
            self.slack_paused = true;
            self.last_slack_action = Some(now);
            if let Some(motion) = self.motion.as_mut() {
                motion.paused_since = Some(now);
            }
        } else if self.slack_paused && self.slack >= self.cfg.resume_slack_m && cooled {
            info!("Slack {:.2} m recovered, resuming raise", self.slack);
            self.energize(Relay::Raise);
            self.slack_paused = false;
            self.last_slack_action = Some(now);
            self.end_pause(now);
        }
    }

    fn end_pause(&mut self, now: Instant) {
        if let Some(motion) = self.motion.as_mut() {
            if let Some(since) = motion.paused_since.take() {
                motion.paused_for += now.saturating_duration_since(since);
            }
        }
    }

    /// Release both relays, learn from the move and go idle. No-op when idle.
    pub fn stop(&mut self, now: Instant) {
        let Some(motion) = self.motion.take() else {
            debug!("stop() while idle");
            return;
        };
        self.release_all();
        self.calibrate(&motion, now);
        self.slack_paused = false;
        self.last_slack_action = None;
        debug!("Stopped at {:.2} m, relays off", self.rode_length);
    }

    // ── Relays ───────────────────────────────────────────────────────────────

    fn write(&mut self, relay: Relay, energized: bool) {
        if self.relay_state.get(relay) == energized {
            return;
        }
        self.relays.write(relay, energized);
        self.relay_state.set(relay, energized);
        self.telemetry.publish(TelemetryEvent::RelayChanged {
            lower: self.relay_state.lower,
            raise: self.relay_state.raise,
        });
    }

    fn energize(&mut self, relay: Relay) {
        self.write(relay.opposite(), false);
        self.write(relay, true);
    }

    fn release_all(&mut self) {
        self.write(Relay::Raise, false);
        self.write(Relay::Lower, false);
    }

    // ── Speed calibration ────────────────────────────────────────────────────

    fn calibrate(&mut self, motion: &MotionCommand, now: Instant) {
        let elapsed_ms = motion.driven_for(now).as_millis();
        let moved = (self.rode_length - motion.start_position).abs();
        if elapsed_ms < MIN_CALIBRATION_MS || moved < MIN_CALIBRATION_DISTANCE_M {
            return;
        }

        let raw = elapsed_ms as f32 / moved;
        let alpha = self.cfg.speed_smoothing;
        let speed = self.speeds.for_direction_mut(motion.direction);
        *speed = alpha * raw + (1.0 - alpha) * *speed;
        let updated = *speed;

        info!(
            "{} speed {:.0} ms/m (sample {:.0} ms/m over {:.2} m)",
            motion.direction, updated, raw, moved
        );
        self.store.save(&self.speeds);
        self.telemetry.publish(TelemetryEvent::SpeedCalibrated {
            direction: motion.direction,
            ms_per_meter: updated,
        });
    }

    // ── Slack & geometry ─────────────────────────────────────────────────────

    pub fn horizontal_force(&self) -> f32 {
        catenary::horizontal_force(self.env.wind_speed(&self.physics), &self.physics)
    }

    /// Reach of `chain_length` of rode down to `depth` under the current wind.
    pub fn target_horizontal_distance(&self, chain_length: f32, depth: f32) -> f32 {
        catenary::target_horizontal_distance(chain_length, depth, self.horizontal_force(), &self.physics)
    }

    /// Recompute slack from the latest readings; republish on a real change.
    pub fn publish_horizontal_slack(&mut self) -> f32 {
        let slack = catenary::horizontal_slack(
            self.rode_length,
            self.env.depth(),
            self.env.distance(),
            self.cfg.bow_height_m,
            self.horizontal_force(),
            &self.physics,
        );
        if (slack - self.slack).abs() > SLACK_PUBLISH_HYSTERESIS_M {
            self.slack = slack;
            debug!("Horizontal slack {slack:.2} m");
            self.telemetry.publish(TelemetryEvent::HorizontalSlack { meters: slack });
        }
        self.slack
    }

    /// Last published slack.
    pub fn horizontal_slack(&self) -> f32 {
        self.slack
    }

    pub fn in_final_pull_zone(&self) -> bool {
        self.rode_length <= self.env.depth() + self.cfg.bow_height_m + self.cfg.final_pull_margin_m
    }

    // ── State queries ────────────────────────────────────────────────────────

    pub fn is_active(&self) -> bool {
        self.motion.is_some()
    }

    pub fn direction(&self) -> Option<Direction> {
        self.motion.map(|m| m.direction)
    }

    pub fn target(&self) -> Option<f32> {
        self.motion.map(|m| m.target)
    }

    pub fn motion(&self) -> Option<&MotionCommand> {
        self.motion.as_ref()
    }

    /// Timeout computed for the most recent move.
    pub fn timeout(&self) -> Duration {
        self.last_timeout
    }

    pub fn speed_profile(&self) -> SpeedProfile {
        self.speeds
    }

    pub fn relay_state(&self) -> RelayState {
        self.relay_state
    }

    pub fn is_slack_paused(&self) -> bool {
        self.slack_paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySpeedStore;
    use crate::relay::MemoryRelays;
    use rode_types::SensorReadings;

    struct Rig {
        act: PositionActuator,
        relays: MemoryRelays,
        store: MemorySpeedStore,
        t0: Instant,
    }

    fn rig() -> Rig {
        let relays = MemoryRelays::new();
        let store = MemorySpeedStore::new();
        let act = PositionActuator::new(
            ActuatorConfig::default(),
            PhysicsConfig::default(),
            Box::new(relays.clone()),
            Box::new(store.clone()),
            SpeedProfile::default(),
            Telemetry::default(),
        );
        Rig { act, relays, store, t0: Instant::now() }
    }

    fn ms(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    fn env(depth: f32, distance: f32) -> EnvironmentSnapshot {
        EnvironmentSnapshot::from_readings(&SensorReadings {
            rode_length: 0.0,
            depth: Some(depth),
            distance_from_bow: Some(distance),
            wind_speed: Some(5.0),
            tide_now: None,
            tide_high: None,
        })
    }

    #[test]
    fn lowering_clamps_to_stop_before_max() {
        let mut r = rig();
        r.act.observe(70.0, EnvironmentSnapshot::default());
        r.act.lower_anchor(10.0, r.t0);
        assert_eq!(r.act.target(), Some(75.0));
        assert_eq!(r.act.direction(), Some(Direction::Lowering));
        assert!(r.act.relay_state().lower);
    }

    #[test]
    fn raising_clamps_to_min_length() {
        let mut r = rig();
        r.act.observe(5.0, EnvironmentSnapshot::default());
        r.act.raise_anchor(10.0, r.t0);
        assert_eq!(r.act.target(), Some(2.0));
    }

    #[test]
    fn zero_length_move_stops_in_same_call() {
        let mut r = rig();
        r.act.observe(20.0, EnvironmentSnapshot::default());
        r.act.lower_anchor(0.0, r.t0);
        assert!(!r.act.is_active());
        assert!(!r.relays.state().any());
        assert_eq!(r.act.timeout(), Duration::from_millis(10_000));
    }

    #[test]
    fn timeout_scales_with_distance_and_speed() {
        let mut r = rig();
        r.act.observe(10.0, EnvironmentSnapshot::default());
        r.act.lower_anchor(4.0, r.t0);
        assert_eq!(r.act.timeout(), Duration::from_millis(4 * 1000 + 5000));
    }

    #[test]
    fn huge_learned_speed_caps_the_timeout() {
        let mut r = rig();
        r.act.speeds = SpeedProfile { up_ms_per_meter: 1e20, down_ms_per_meter: 1e20 }.sanitized();
        r.act.observe(10.0, EnvironmentSnapshot::default());
        r.act.lower_anchor(5.0, r.t0);
        assert!(r.act.is_active());
        assert_eq!(r.act.timeout(), Duration::from_millis(MAX_EXPECTED_MOVE_MS + 5000));
        r.act.control(12.0, ms(r.t0, 60_000));
        assert!(r.act.is_active());
    }

    #[test]
    fn timed_out_move_is_forced_off_within_one_tick() {
        let mut r = rig();
        r.act.observe(10.0, EnvironmentSnapshot::default());
        r.act.lower_anchor(4.0, r.t0);
        r.act.control(11.0, ms(r.t0, 5000));
        assert!(r.act.is_active());
        r.act.control(11.5, ms(r.t0, 9001));
        assert!(!r.act.is_active());
        assert!(!r.relays.state().any());
        assert!(!r.act.relay_state().any());
    }

    #[test]
    fn lowering_stops_at_target_and_calibrates() {
        let mut r = rig();
        r.act.observe(10.0, EnvironmentSnapshot::default());
        r.act.lower_anchor(5.0, r.t0);
        r.act.control(12.0, ms(r.t0, 1400));
        assert!(r.act.relay_state().lower);
        r.act.control(15.0, ms(r.t0, 3500));
        assert!(!r.act.is_active());
        // 3500 ms over 5 m = 700 ms/m; 0.2 * 700 + 0.8 * 1000
        let down = r.act.speed_profile().down_ms_per_meter;
        assert!((down - 940.0).abs() < 0.01, "down={down}");
        assert_eq!(r.store.saves().len(), 1);
        assert_eq!(r.act.speed_profile().up_ms_per_meter, 1000.0);
    }

    #[test]
    fn short_moves_do_not_calibrate() {
        let mut r = rig();
        r.act.observe(10.0, EnvironmentSnapshot::default());
        r.act.lower_anchor(5.0, r.t0);
        r.act.control(10.005, ms(r.t0, 50));
        r.act.stop(ms(r.t0, 60));
        assert!(r.store.saves().is_empty());
        assert_eq!(r.act.speed_profile(), SpeedProfile::default());
    }

    #[test]
    fn calibration_converges_monotonically() {
        let mut r = rig();
        let true_speed = 700.0_f32;
        let mut position = 10.0_f32;
        let mut clock = 0_u64;
        let mut last_error = f32::MAX;
        for _ in 0..10 {
            r.act.observe(position, EnvironmentSnapshot::default());
            r.act.lower_anchor(5.0, ms(r.t0, clock));
            clock += (5.0 * true_speed) as u64;
            position += 5.0;
            r.act.control(position, ms(r.t0, clock));
            assert!(!r.act.is_active());
            let error = (r.act.speed_profile().down_ms_per_meter - true_speed).abs();
            assert!(error < last_error);
            last_error = error;
            if position > 60.0 {
                position = 10.0;
            }
        }
        assert!(last_error < 40.0);
    }

    #[test]
    fn relays_never_overlap_across_reversals() {
        let mut r = rig();
        r.act.observe(30.0, env(8.0, 10.0));
        r.act.publish_horizontal_slack();
        let mut t = 0;
        for i in 0..20 {
            t += 250;
            if i % 2 == 0 {
                r.act.lower_anchor(3.0, ms(r.t0, t));
            } else {
                r.act.raise_anchor(3.0, ms(r.t0, t));
            }
            assert!(!(r.act.relay_state().lower && r.act.relay_state().raise));
        }
        r.act.stop(ms(r.t0, t + 10));
        assert_eq!(r.relays.overlaps(), 0);
        assert!(!r.relays.state().any());
    }

    #[test]
    fn raising_pauses_on_low_slack_and_resumes_after_cooldown() {
        let mut r = rig();
        // 40 m out in 8 m of water, boat 36 m away: nearly taut.
        r.act.observe(40.0, env(8.0, 36.0));
        let slack = r.act.publish_horizontal_slack();
        assert!(slack < 0.2, "slack={slack}");

        r.act.raise_anchor(10.0, r.t0);
        assert!(r.act.is_slack_paused());
        assert!(!r.act.relay_state().raise);
        assert!(r.act.is_active());

        // Boat swings in, slack rebuilds, but cooldown has not elapsed yet.
        r.act.observe(40.0, env(8.0, 20.0));
        r.act.publish_horizontal_slack();
        r.act.control(40.0, ms(r.t0, 1000));
        assert!(r.act.is_slack_paused());

        r.act.control(40.0, ms(r.t0, 3000));
        assert!(!r.act.is_slack_paused());
        assert!(r.act.relay_state().raise);
    }

    #[test]
    fn slack_pauses_do_not_count_towards_calibration() {
        let mut r = rig();
        r.act.observe(40.0, env(8.0, 36.0));
        r.act.publish_horizontal_slack();
        r.act.raise_anchor(10.0, r.t0);
        assert!(r.act.is_slack_paused());

        r.act.observe(40.0, env(8.0, 20.0));
        r.act.publish_horizontal_slack();
        r.act.control(40.0, ms(r.t0, 3000));
        assert!(r.act.relay_state().raise);

        // 5500 ms of actual drive over 10 m = 550 ms/m; 0.2 * 550 + 0.8 * 1000
        r.act.control(30.0, ms(r.t0, 8500));
        assert!(!r.act.is_active());
        let up = r.act.speed_profile().up_ms_per_meter;
        assert!((up - 910.0).abs() < 0.01, "up={up}");
    }

    #[test]
    fn final_pull_zone_ignores_slack() {
        let mut r = rig();
        // 12 m out in 8 m: inside depth + bow + margin = 13 m.
        r.act.observe(12.0, env(8.0, 0.0));
        r.act.publish_horizontal_slack();
        assert!(r.act.in_final_pull_zone());
        r.act.raise_anchor(8.0, r.t0);
        assert!(!r.act.is_slack_paused());
        assert!(r.act.relay_state().raise);
    }

    #[test]
    fn slack_republishes_only_on_real_change() {
        let telemetry = Telemetry::default();
        let mut rx = telemetry.subscribe();
        let mut act = PositionActuator::new(
            ActuatorConfig::default(),
            PhysicsConfig::default(),
            Box::new(MemoryRelays::new()),
            Box::new(MemorySpeedStore::new()),
            SpeedProfile::default(),
            telemetry,
        );
        act.observe(25.0, env(8.0, 0.0));
        act.publish_horizontal_slack();
        act.observe(25.005, env(8.0, 0.0));
        act.publish_horizontal_slack();
        let events = crate::telemetry::drain(&mut rx);
        let slack_events = events
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::HorizontalSlack { .. }))
            .count();
        assert_eq!(slack_events, 1);
    }
}
