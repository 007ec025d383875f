//! retrieval.rs — automatic anchor recovery.
//!
//! Brings the rode in a slack-sized bite at a time while the boat motors or
//! swings up to the anchor, then finishes with one continuous pull once the
//! rode is nearly vertical.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use rode_types::{Sequence, TelemetryEvent};

use crate::actuator::PositionActuator;
use crate::config::RetrievalConfig;
use crate::schedule::Repeat;
use crate::telemetry::{CompletionCallback, Telemetry};

/// Final-pull raises shorter than this are not worth a relay cycle; a rode
/// this close to the completion threshold counts as home.
const MIN_FINAL_PULL_M: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalState {
    Idle,
    CheckingSlack,
    Raising,
    WaitingForSlack,
    Complete,
}

impl RetrievalState {
    pub fn label(self) -> &'static str {
        match self {
            RetrievalState::Idle => "Idle",
            RetrievalState::CheckingSlack => "Checking slack",
            RetrievalState::Raising => "Raising",
            RetrievalState::WaitingForSlack => "Waiting for slack",
            RetrievalState::Complete => "Complete",
        }
    }
}

impl std::fmt::Display for RetrievalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

pub struct RetrievalSequencer {
    cfg: RetrievalConfig,
    telemetry: Telemetry,
    on_complete: Option<CompletionCallback>,

    state: RetrievalState,
    running: bool,
    completed: bool,
    ticker: Option<Repeat>,
    /// `None` lets the first raise go out immediately.
    last_raise: Option<Instant>,
}

impl RetrievalSequencer {
    pub fn new(cfg: RetrievalConfig, telemetry: Telemetry) -> Self {
        Self {
            cfg,
            telemetry,
            on_complete: None,
            state: RetrievalState::Idle,
            running: false,
            completed: false,
            ticker: None,
            last_raise: None,
        }
    }

    pub fn set_completion_callback(&mut self, callback: CompletionCallback) {
        self.on_complete = Some(callback);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn state(&self) -> RetrievalState {
        self.state
    }

    pub fn start(&mut self, now: Instant) {
        if self.running {
            info!("Retrieval already running ({})", self.state);
            return;
        }
        info!("⚓ Retrieval started");
        self.running = true;
        self.completed = false;
        self.last_raise = None;
        self.ticker = Some(Repeat::start(now, Duration::from_millis(self.cfg.tick_ms)));
        self.transition(RetrievalState::CheckingSlack);
    }

    pub fn stop(&mut self, act: &mut PositionActuator, now: Instant) {
        if !self.running {
            return;
        }
        info!("Retrieval stopped ({})", self.state);
        self.running = false;
        if act.is_active() {
            act.stop(now);
        }
        self.transition(RetrievalState::Idle);
        self.telemetry.publish(TelemetryEvent::SequenceFinished {
            sequence: Sequence::Retrieval,
        });
        if let Some(callback) = self.on_complete.as_mut() {
            callback();
        }
    }

    fn transition(&mut self, next: RetrievalState) {
        if next == self.state {
            return;
        }
        info!("Retrieval: {} → {}", self.state, next);
        self.state = next;
        self.telemetry.publish(TelemetryEvent::Stage {
            sequence: Sequence::Retrieval,
            label: next.label().to_string(),
        });
    }

    fn cooled_down(&self, now: Instant) -> bool {
        let cooldown = Duration::from_millis(self.cfg.cooldown_after_raise_ms);
        self.last_raise
            .map_or(true, |t| now.saturating_duration_since(t) >= cooldown)
    }

    fn in_final_pull(&self, rode: f32, depth: f32) -> bool {
        rode < depth + self.cfg.final_pull_threshold_m
    }

    /// Slack needed before another bite is taken.
    fn resume_slack(&self, depth: f32) -> f32 {
        (depth * self.cfg.resume_slack_ratio).max(self.cfg.min_raise_amount_m)
    }

    pub fn tick(&mut self, act: &mut PositionActuator, now: Instant) {
        if !self.running || !self.ticker.as_mut().is_some_and(|t| t.due(now)) {
            return;
        }

        let rode = act.rode_length();
        let depth = act.environment().depth();
        let slack = act.horizontal_slack();

        match self.state {
            RetrievalState::Idle | RetrievalState::Complete => {}

            RetrievalState::CheckingSlack => {
                if rode - self.cfg.completion_threshold_m <= MIN_FINAL_PULL_M {
                    info!("⚓ Retrieval complete, rode {rode:.2} m");
                    self.transition(RetrievalState::Complete);
                    self.completed = true;
                    self.stop(act, now);
                } else if act.is_active() {
                    debug!("Windlass busy, waiting");
                } else if self.in_final_pull(rode, depth) {
                    let amount = rode - self.cfg.completion_threshold_m;
                    if self.cooled_down(now) {
                        info!("Final pull: raising {amount:.2} m (rode {rode:.2} m, depth {depth:.2} m)");
                        act.raise_anchor(amount, now);
                        self.last_raise = Some(now);
                        self.transition(RetrievalState::Raising);
                    }
                } else if !self.cooled_down(now) {
                    self.transition(RetrievalState::WaitingForSlack);
                } else if slack >= depth * self.cfg.resume_slack_ratio && slack >= self.cfg.min_raise_amount_m {
                    debug!("Slack {slack:.2} m available, raising");
                    act.raise_anchor(slack, now);
                    self.last_raise = Some(now);
                    self.transition(RetrievalState::Raising);
                } else {
                    debug!("Slack {slack:.2} m too small to raise");
                    self.transition(RetrievalState::WaitingForSlack);
                }
            }

            RetrievalState::Raising => {
                if !self.in_final_pull(rode, depth) && slack < 0.0 && act.is_active() {
                    warn!("Rode went taut while raising (slack {slack:.2} m), stopping");
                    act.stop(now);
                    self.last_raise = Some(now);
                    self.transition(RetrievalState::WaitingForSlack);
                } else if !act.is_active() {
                    debug!("Raise finished at {rode:.2} m");
                    self.transition(RetrievalState::WaitingForSlack);
                }
            }

            RetrievalState::WaitingForSlack => {
                if rode <= self.cfg.completion_threshold_m || self.in_final_pull(rode, depth) {
                    self.transition(RetrievalState::CheckingSlack);
                } else if self.cooled_down(now) && slack >= self.resume_slack(depth) {
                    debug!("Slack rebuilt to {slack:.2} m");
                    self.transition(RetrievalState::CheckingSlack);
                }
            }
        }
    }
}
