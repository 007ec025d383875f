//! windlass.rs — the assembled controller.
//!
//! Owns the actuator and both sequencers and is the only thing that talks to
//! them from outside. At most one sequencer runs at a time.

use std::time::Instant;

use tracing::info;

use rode_types::{Command, SensorReadings, SpeedProfile};

use crate::actuator::PositionActuator;
use crate::config::WindlassConfig;
use crate::deployment::{DeploymentSequencer, SequenceError};
use crate::environment::EnvironmentSnapshot;
use crate::persistence::SpeedStore;
use crate::relay::RelayDriver;
use crate::retrieval::RetrievalSequencer;
use crate::telemetry::Telemetry;

pub struct Windlass {
    actuator: PositionActuator,
    deployment: DeploymentSequencer,
    retrieval: RetrievalSequencer,
    telemetry: Telemetry,
}

impl Windlass {
    pub fn new(
        cfg: &WindlassConfig,
        relays: Box<dyn RelayDriver>,
        store: Box<dyn SpeedStore>,
        speeds: SpeedProfile,
        telemetry: Telemetry,
    ) -> Self {
        let actuator = PositionActuator::new(
            cfg.actuator.clone(),
            cfg.physics.clone(),
            relays,
            store,
            speeds,
            telemetry.clone(),
        );
        Self {
            actuator,
            deployment: DeploymentSequencer::new(cfg.deployment.clone(), telemetry.clone()),
            retrieval: RetrievalSequencer::new(cfg.retrieval.clone(), telemetry.clone()),
            telemetry,
        }
    }

    pub fn actuator(&self) -> &PositionActuator {
        &self.actuator
    }

    pub fn deployment(&self) -> &DeploymentSequencer {
        &self.deployment
    }

    pub fn deployment_mut(&mut self) -> &mut DeploymentSequencer {
        &mut self.deployment
    }

    pub fn retrieval(&self) -> &RetrievalSequencer {
        &self.retrieval
    }

    pub fn retrieval_mut(&mut self) -> &mut RetrievalSequencer {
        &mut self.retrieval
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Either sequencer running or the windlass moving.
    pub fn is_busy(&self) -> bool {
        self.deployment.is_running() || self.retrieval.is_running() || self.actuator.is_active()
    }

    fn stop_sequences(&mut self, now: Instant) {
        self.deployment.stop(&mut self.actuator, now);
        self.retrieval.stop(&mut self.actuator, now);
    }

    /// Execute an operator command. Only `AutoDrop` can be refused.
    pub fn apply(&mut self, command: Command, now: Instant) -> Result<(), SequenceError> {
        info!("Command: {command:?}");
        match command {
            Command::Drop => {
                self.stop_sequences(now);
                let env = self.actuator.environment();
                let anchor_depth = env.tide_adjusted_depth() + self.actuator.config().bow_height_m;
                let rode = self.actuator.rode_length();
                if rode < anchor_depth {
                    self.actuator.lower_anchor(anchor_depth - rode, now);
                } else {
                    info!("Drop: rode {rode:.2} m already reaches {anchor_depth:.2} m");
                }
            }
            Command::Lower { meters } => {
                self.stop_sequences(now);
                self.actuator.lower_anchor(meters, now);
            }
            Command::Raise { meters } => {
                self.stop_sequences(now);
                self.actuator.raise_anchor(meters, now);
            }
            Command::AutoDrop { scope } => {
                self.retrieval.stop(&mut self.actuator, now);
                self.deployment.start(scope, &mut self.actuator, now)?;
            }
            Command::AutoRetrieve => {
                self.deployment.stop(&mut self.actuator, now);
                self.retrieval.start(now);
            }
            Command::Stop => {
                self.stop_sequences(now);
                self.actuator.stop(now);
            }
        }
        Ok(())
    }

    /// One control tick.
    pub fn poll(&mut self, readings: &SensorReadings, now: Instant) {
        let env = EnvironmentSnapshot::from_readings(readings);
        self.actuator.observe(readings.rode_length, env);
        self.actuator.publish_horizontal_slack();
        let rode = self.actuator.rode_length();
        self.actuator.control(rode, now);
        self.deployment.tick(&mut self.actuator, now);
        self.retrieval.tick(&mut self.actuator, now);
    }
}
