//! # windlass-controller
//!
//! Control core for an electric anchor windlass: a position actuator that
//! drives the two relays to absolute rode lengths, and two sequencers built on
//! top of it for automatic deployment and retrieval.
//!
//! Everything is driven from one cooperative tick ([`Windlass::poll`]); time is
//! always passed in, never read from the clock inside the core.

pub mod actuator;
pub mod catenary;
pub mod config;
pub mod deployment;
pub mod environment;
pub mod persistence;
pub mod protocol;
pub mod relay;
pub mod retrieval;
pub mod schedule;
pub mod telemetry;
pub mod windlass;

pub use actuator::PositionActuator;
pub use config::WindlassConfig;
pub use deployment::{DeploymentPlan, DeploymentSequencer, DeploymentStage, SequenceError};
pub use environment::EnvironmentSnapshot;
pub use relay::{MemoryRelays, Relay, RelayDriver, RelayState};
pub use retrieval::{RetrievalSequencer, RetrievalState};
pub use telemetry::Telemetry;
pub use windlass::Windlass;
