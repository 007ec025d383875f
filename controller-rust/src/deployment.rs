//! deployment.rs — staged automatic anchor drop.
//!
//! Pays the rode out in legs: an initial drop to just past the seabed, then
//! 40%, 80% and 100% of the planned total, letting the boat drift back and the
//! anchor set between legs. Every leg is the same sub-protocol: drive to an
//! absolute length, wait for the boat to take up the chain, hold.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use rode_types::{Sequence, TelemetryEvent};

use crate::actuator::PositionActuator;
use crate::catenary;
use crate::config::{DeploymentConfig, PhysicsConfig};
use crate::environment::EnvironmentSnapshot;
use crate::schedule::{Deadline, Epoch, Fired, Repeat};
use crate::telemetry::{CompletionCallback, Telemetry};

/// Lengths within this of a target count as reached.
const LENGTH_TOLERANCE_M: f32 = 0.01;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SequenceError {
    #[error("depth reading unavailable")]
    DepthUnavailable,
    #[error("depth {depth:.1} m outside the automatic deployment range")]
    DepthOutOfRange { depth: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeploymentStage {
    Idle,
    Drop,
    WaitTight,
    HoldDrop,
    DeployFirst,
    WaitFirst,
    HoldFirst,
    DeploySecond,
    WaitSecond,
    HoldSecond,
    DeployFinal,
    Complete,
}

impl DeploymentStage {
    pub fn label(self) -> &'static str {
        match self {
            DeploymentStage::Idle => "Idle",
            DeploymentStage::Drop => "Drop",
            DeploymentStage::WaitTight => "Wait tight",
            DeploymentStage::HoldDrop => "Hold drop",
            DeploymentStage::DeployFirst => "Deploy 40%",
            DeploymentStage::WaitFirst => "Wait 40%",
            DeploymentStage::HoldFirst => "Hold 40%",
            DeploymentStage::DeploySecond => "Deploy 80%",
            DeploymentStage::WaitSecond => "Wait 80%",
            DeploymentStage::HoldSecond => "Hold 80%",
            DeploymentStage::DeployFinal => "Deploy 100%",
            DeploymentStage::Complete => "Complete",
        }
    }

    /// Strict forward order; `Complete` and `Idle` have no successor.
    pub fn next(self) -> DeploymentStage {
        use DeploymentStage::*;
        match self {
            Idle => Idle,
            Drop => WaitTight,
            WaitTight => HoldDrop,
            HoldDrop => DeployFirst,
            DeployFirst => WaitFirst,
            WaitFirst => HoldFirst,
            HoldFirst => DeploySecond,
            DeploySecond => WaitSecond,
            WaitSecond => HoldSecond,
            HoldSecond => DeployFinal,
            DeployFinal => Complete,
            Complete => Complete,
        }
    }
}

impl std::fmt::Display for DeploymentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Plan ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeploymentPlan {
    pub scope: f32,
    /// Tide-adjusted depth plus bow height.
    pub anchor_depth: f32,
    pub total_chain: f32,
    pub drop_length: f32,
    pub first_length: f32,
    pub second_length: f32,
    pub drop_distance: f32,
    pub first_distance: f32,
    pub second_distance: f32,
}

impl DeploymentPlan {
    pub fn compute(
        scope: Option<f32>,
        env: &EnvironmentSnapshot,
        bow_height: f32,
        cfg: &DeploymentConfig,
        physics: &PhysicsConfig,
    ) -> Result<Self, SequenceError> {
        if !env.has_depth() {
            return Err(SequenceError::DepthUnavailable);
        }
        let depth = env.depth();
        if !(cfg.min_depth_m..=cfg.max_depth_m).contains(&depth) {
            return Err(SequenceError::DepthOutOfRange { depth });
        }

        let scope = scope
            .filter(|s| s.is_finite())
            .unwrap_or(cfg.default_scope)
            .clamp(cfg.min_scope, cfg.max_scope);

        let anchor_depth = env.tide_adjusted_depth() + bow_height;
        let total_chain = (scope * anchor_depth).max(cfg.min_total_chain_m);
        let drop_length = anchor_depth + cfg.initial_drop_slack_m;
        let first_length = cfg.first_stage_ratio * total_chain;
        let second_length = cfg.second_stage_ratio * total_chain;

        let force = catenary::horizontal_force(env.wind_speed(physics), physics);
        let reach = |len: f32| catenary::target_horizontal_distance(len, anchor_depth, force, physics);

        Ok(Self {
            scope,
            anchor_depth,
            total_chain,
            drop_length,
            first_length,
            second_length,
            drop_distance: reach(drop_length),
            first_distance: reach(first_length),
            second_distance: reach(second_length),
        })
    }

    fn legs(&self, cfg: &DeploymentConfig) -> [Leg; 4] {
        use DeploymentStage::*;
        [
            Leg {
                drive: Drop,
                target_length: self.drop_length,
                wait: Some((WaitTight, self.drop_distance)),
                hold: Some((HoldDrop, Duration::from_millis(cfg.hold_drop_ms))),
                monitored: false,
            },
            Leg {
                drive: DeployFirst,
                target_length: self.first_length,
                wait: Some((WaitFirst, self.first_distance)),
                hold: Some((HoldFirst, Duration::from_millis(cfg.hold_first_ms))),
                monitored: true,
            },
            Leg {
                drive: DeploySecond,
                target_length: self.second_length,
                wait: Some((WaitSecond, self.second_distance)),
                hold: Some((HoldSecond, Duration::from_millis(cfg.hold_second_ms))),
                monitored: true,
            },
            Leg {
                drive: DeployFinal,
                target_length: self.total_chain,
                wait: None,
                hold: None,
                monitored: true,
            },
        ]
    }
}

/// One drive → wait → hold row.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Leg {
    drive: DeploymentStage,
    target_length: f32,
    /// Wait stage and the horizontal distance that ends it.
    wait: Option<(DeploymentStage, f32)>,
    hold: Option<(DeploymentStage, Duration)>,
    /// Drive under the slack monitor rather than a single fire-and-wait move.
    monitored: bool,
}

enum Step {
    Drive(Leg),
    Wait(f32),
    Hold,
}

/// Slack the deployment paces against: the published value, or 0 while the
/// distance source is down and no horizontal geometry exists.
fn payout_slack(act: &PositionActuator) -> f32 {
    if act.environment().has_distance() {
        act.horizontal_slack()
    } else {
        0.0
    }
}

// ── Sequencer ────────────────────────────────────────────────────────────────

pub struct DeploymentSequencer {
    cfg: DeploymentConfig,
    telemetry: Telemetry,
    on_complete: Option<CompletionCallback>,

    stage: DeploymentStage,
    running: bool,
    plan: Option<DeploymentPlan>,
    legs: Vec<Leg>,
    epoch: Epoch,
    ticker: Option<Repeat>,

    command_issued: bool,
    hold: Option<Deadline>,
    monitor: Option<Deadline>,
    monitor_paused: bool,
}

impl DeploymentSequencer {
    pub fn new(cfg: DeploymentConfig, telemetry: Telemetry) -> Self {
        Self {
            cfg,
            telemetry,
            on_complete: None,
            stage: DeploymentStage::Idle,
            running: false,
            plan: None,
            legs: Vec::new(),
            epoch: Epoch::default(),
            ticker: None,
            command_issued: false,
            hold: None,
            monitor: None,
            monitor_paused: false,
        }
    }

    pub fn set_completion_callback(&mut self, callback: CompletionCallback) {
        self.on_complete = Some(callback);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stage(&self) -> DeploymentStage {
        self.stage
    }

    pub fn plan(&self) -> Option<&DeploymentPlan> {
        self.plan.as_ref()
    }

    pub fn start(&mut self, scope: Option<f32>, act: &mut PositionActuator, now: Instant) -> Result<(), SequenceError> {
        if self.running {
            info!("Deployment already running ({})", self.stage);
            return Ok(());
        }

        let plan = DeploymentPlan::compute(scope, act.environment(), act.config().bow_height_m, &self.cfg, act.physics())
            .inspect_err(|e| warn!("Refusing to start deployment: {e}"))?;

        info!(
            "⚓ Deployment started: scope {:.1}, anchor depth {:.2} m, total {:.2} m (drop {:.2} / {:.2} / {:.2} m)",
            plan.scope, plan.anchor_depth, plan.total_chain, plan.drop_length, plan.first_length, plan.second_length
        );
        info!(
            "Target distances: drop {:.2} m, 40% {:.2} m, 80% {:.2} m",
            plan.drop_distance, plan.first_distance, plan.second_distance
        );

        self.legs = plan.legs(&self.cfg).to_vec();
        self.plan = Some(plan);
        self.running = true;
        self.ticker = Some(Repeat::start(now, Duration::from_millis(self.cfg.tick_ms)));
        self.transition(DeploymentStage::Drop, now);
        Ok(())
    }

    /// Abort: cancel everything, stop the windlass, notify.
    pub fn stop(&mut self, act: &mut PositionActuator, now: Instant) {
        if !self.running {
            return;
        }
        info!("Deployment stopped during {}", self.stage);
        self.halt(act, now);
        self.notify_finished();
    }

    pub fn reset(&mut self, act: &mut PositionActuator, now: Instant) {
        self.stop(act, now);
        self.plan = None;
        self.legs.clear();
    }

    fn halt(&mut self, act: &mut PositionActuator, now: Instant) {
        self.running = false;
        self.hold = None;
        self.monitor = None;
        self.monitor_paused = false;
        if act.is_active() {
            act.stop(now);
        }
        self.transition(DeploymentStage::Idle, now);
    }

    fn notify_finished(&mut self) {
        self.telemetry.publish(TelemetryEvent::SequenceFinished {
            sequence: Sequence::Deployment,
        });
        if let Some(callback) = self.on_complete.as_mut() {
            callback();
        }
    }

    fn transition(&mut self, next: DeploymentStage, now: Instant) {
        if next != self.stage {
            info!("Deployment: {} → {}", self.stage, next);
        }
        self.stage = next;
        self.epoch.bump();
        self.command_issued = false;
        self.monitor_paused = false;

        self.hold = self
            .legs
            .iter()
            .find_map(|leg| leg.hold.filter(|(stage, _)| *stage == next))
            .map(|(_, delay)| Deadline::after(now, delay, self.epoch));

        self.telemetry.publish(TelemetryEvent::Stage {
            sequence: Sequence::Deployment,
            label: next.label().to_string(),
        });
    }

    fn advance(&mut self, act: &mut PositionActuator, now: Instant) {
        let next = self.stage.next();
        self.transition(next, now);
        if next == DeploymentStage::Complete {
            info!("⚓ Deployment complete at {:.2} m", act.rode_length());
            self.notify_finished();
            self.halt(act, now);
        }
    }

    fn step(&self) -> Option<Step> {
        for leg in &self.legs {
            if leg.drive == self.stage {
                return Some(Step::Drive(*leg));
            }
            if let Some((stage, distance)) = leg.wait {
                if stage == self.stage {
                    return Some(Step::Wait(distance));
                }
            }
            if matches!(leg.hold, Some((stage, _)) if stage == self.stage) {
                return Some(Step::Hold);
            }
        }
        None
    }

    pub fn tick(&mut self, act: &mut PositionActuator, now: Instant) {
        if !self.running || !self.ticker.as_mut().is_some_and(|t| t.due(now)) {
            return;
        }

        match self.step() {
            Some(Step::Drive(leg)) => self.drive(leg, act, now),
            Some(Step::Wait(distance)) => {
                if self.boat_has_settled(distance, act) {
                    self.advance(act, now);
                }
            }
            Some(Step::Hold) => self.hold_elapsed(act, now),
            None => {
                if self.stage == DeploymentStage::Complete {
                    self.halt(act, now);
                }
            }
        }
    }

    fn hold_elapsed(&mut self, act: &mut PositionActuator, now: Instant) {
        let Some(deadline) = self.hold else {
            return;
        };
        match deadline.fire(now, self.epoch) {
            Fired::NotYet => {}
            Fired::Due => {
                self.hold = None;
                self.advance(act, now);
            }
            Fired::Stale => self.hold = None,
        }
    }

    fn boat_has_settled(&self, target_distance: f32, act: &PositionActuator) -> bool {
        let env = act.environment();
        if env.has_distance() {
            env.distance() >= target_distance
        } else {
            payout_slack(act) < self.cfg.taut_slack_m
        }
    }

    // ── Drive sub-protocol ───────────────────────────────────────────────────

    fn drive(&mut self, leg: Leg, act: &mut PositionActuator, now: Instant) {
        let limits = act.config();
        let target = leg.target_length.min(limits.max_length_m.min(limits.stop_before_max_m));
        let rode = act.rode_length();
        let reached = rode >= target - LENGTH_TOLERANCE_M;

        if !self.command_issued {
            if reached {
                info!("{}: already at {rode:.2} m (target {target:.2} m)", self.stage);
                self.advance(act, now);
                return;
            }
            info!("{}: paying out {:.2} m to {target:.2} m", self.stage, target - rode);
            act.lower_anchor(target - rode, now);
            self.command_issued = true;
            if leg.monitored {
                self.monitor = Some(Deadline::after(now, self.monitor_period(), self.epoch));
            }
            return;
        }

        // A running windlass stops on the target by itself.
        let finished = rode >= target || (!act.is_active() && (reached || !leg.monitored));
        if finished {
            if act.is_active() {
                act.stop(now);
            }
            debug!("{}: leg done at {rode:.2} m", self.stage);
            self.advance(act, now);
        } else if leg.monitored {
            self.run_monitor(target, act, now);
        }
    }

    fn monitor_period(&self) -> Duration {
        Duration::from_millis(self.cfg.monitor_ms)
    }

    /// Depth-relative slack hysteresis while paying out.
    fn run_monitor(&mut self, target: f32, act: &mut PositionActuator, now: Instant) {
        let Some(deadline) = self.monitor else {
            return;
        };
        match deadline.fire(now, self.epoch) {
            Fired::NotYet => return,
            Fired::Stale => {
                debug!("Dropping monitor armed for a previous stage");
                self.monitor = None;
                return;
            }
            Fired::Due => {}
        }
        self.monitor = Some(Deadline::after(now, self.monitor_period(), self.epoch));

        let env = act.environment();
        if !env.has_depth() {
            debug!("Monitor: no depth reading, leaving windlass as is");
            return;
        }
        let depth = env.depth();
        let slack = payout_slack(act);
        let rode = act.rode_length();

        if !self.monitor_paused && slack > self.cfg.pause_slack_depth_ratio * depth {
            info!("{}: slack {slack:.2} m piling up, pausing payout", self.stage);
            act.stop(now);
            self.monitor_paused = true;
        } else if self.monitor_paused && slack < self.cfg.resume_slack_depth_ratio * depth {
            info!("{}: slack {slack:.2} m taken up, resuming payout", self.stage);
            self.monitor_paused = false;
            act.lower_anchor(target - rode, now);
        } else if !self.monitor_paused && !act.is_active() {
            // Move ended short of target (timeout); pick it up again.
            debug!("{}: windlass idle at {rode:.2} m, re-issuing", self.stage);
            act.lower_anchor(target - rode, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rode_types::SensorReadings;

    fn snapshot(depth: Option<f32>) -> EnvironmentSnapshot {
        EnvironmentSnapshot::from_readings(&SensorReadings {
            rode_length: 0.0,
            depth,
            distance_from_bow: None,
            wind_speed: Some(5.0),
            tide_now: None,
            tide_high: None,
        })
    }

    fn compute(scope: Option<f32>, depth: Option<f32>) -> Result<DeploymentPlan, SequenceError> {
        DeploymentPlan::compute(
            scope,
            &snapshot(depth),
            2.0,
            &DeploymentConfig::default(),
            &PhysicsConfig::default(),
        )
    }

    #[test]
    fn plan_in_eight_meters() {
        let plan = compute(None, Some(8.0)).unwrap();
        assert_eq!(plan.scope, 5.0);
        assert_eq!(plan.anchor_depth, 10.0);
        assert_eq!(plan.total_chain, 50.0);
        assert_eq!(plan.drop_length, 12.0);
        assert!((plan.first_length - 20.0).abs() < 1e-4);
        assert!((plan.second_length - 40.0).abs() < 1e-4);
        assert!(plan.drop_distance < plan.first_distance);
        assert!(plan.first_distance < plan.second_distance);
        assert!(plan.second_distance <= (40.0_f32 * 40.0 - 100.0).sqrt());
    }

    #[test]
    fn scope_is_clamped() {
        assert_eq!(compute(Some(20.0), Some(8.0)).unwrap().scope, 10.0);
        assert_eq!(compute(Some(1.0), Some(8.0)).unwrap().scope, 3.0);
        assert_eq!(compute(Some(f32::NAN), Some(8.0)).unwrap().scope, 5.0);
    }

    #[test]
    fn total_chain_has_a_floor() {
        let cfg = DeploymentConfig { min_depth_m: 0.5, ..DeploymentConfig::default() };
        let plan = DeploymentPlan::compute(Some(3.0), &snapshot(Some(1.0)), 0.5, &cfg, &PhysicsConfig::default()).unwrap();
        assert_eq!(plan.total_chain, 10.0);
    }

    #[test]
    fn depth_precondition() {
        assert_eq!(compute(None, None), Err(SequenceError::DepthUnavailable));
        assert_eq!(compute(None, Some(f32::INFINITY)), Err(SequenceError::DepthUnavailable));
        assert_eq!(compute(None, Some(2.5)), Err(SequenceError::DepthOutOfRange { depth: 2.5 }));
        assert_eq!(compute(None, Some(46.0)), Err(SequenceError::DepthOutOfRange { depth: 46.0 }));
        assert!(compute(None, Some(45.0)).is_ok());
    }

    #[test]
    fn stages_run_strictly_forward() {
        let mut stage = DeploymentStage::Drop;
        let mut seen = vec![stage];
        while stage != DeploymentStage::Complete {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(seen.len(), 11);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn legs_cover_every_motion_stage() {
        let plan = compute(None, Some(8.0)).unwrap();
        let legs = plan.legs(&DeploymentConfig::default());
        let drives: Vec<_> = legs.iter().map(|l| l.drive).collect();
        assert_eq!(
            drives,
            vec![
                DeploymentStage::Drop,
                DeploymentStage::DeployFirst,
                DeploymentStage::DeploySecond,
                DeploymentStage::DeployFinal
            ]
        );
        assert!(!legs[0].monitored);
        assert_eq!(legs[3].target_length, 50.0);
    }
}
