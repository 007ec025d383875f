//! Two-relay windlass output.
//!
//! Pin assignment and electrical drive live behind [`RelayDriver`]; the
//! actuator only ever asks for a relay to be energized or released.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    Lower,
    Raise,
}

impl Relay {
    pub fn opposite(self) -> Relay {
        match self {
            Relay::Lower => Relay::Raise,
            Relay::Raise => Relay::Lower,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayState {
    pub lower: bool,
    pub raise: bool,
}

impl RelayState {
    pub fn get(&self, relay: Relay) -> bool {
        match relay {
            Relay::Lower => self.lower,
            Relay::Raise => self.raise,
        }
    }

    pub fn set(&mut self, relay: Relay, energized: bool) {
        match relay {
            Relay::Lower => self.lower = energized,
            Relay::Raise => self.raise = energized,
        }
    }

    pub fn any(&self) -> bool {
        self.lower || self.raise
    }
}

pub trait RelayDriver: Send {
    fn write(&mut self, relay: Relay, energized: bool);
}

#[derive(Debug, Default)]
struct RelayLog {
    state: RelayState,
    writes: usize,
    overlaps: usize,
}

/// In-memory relay pair. Clones share state, so a harness can watch the
/// outputs the actuator drives.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelays {
    inner: Arc<Mutex<RelayLog>>,
}

impl MemoryRelays {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RelayState {
        self.inner.lock().map(|l| l.state).unwrap_or_default()
    }

    /// Number of writes after which both relays were energized at once.
    pub fn overlaps(&self) -> usize {
        self.inner.lock().map(|l| l.overlaps).unwrap_or_default()
    }

    pub fn writes(&self) -> usize {
        self.inner.lock().map(|l| l.writes).unwrap_or_default()
    }
}

impl RelayDriver for MemoryRelays {
    fn write(&mut self, relay: Relay, energized: bool) {
        let Ok(mut log) = self.inner.lock() else {
            return;
        };
        log.state.set(relay, energized);
        log.writes += 1;
        if log.state.lower && log.state.raise {
            log.overlaps += 1;
            error!("both windlass relays energized");
        }
    }
}
