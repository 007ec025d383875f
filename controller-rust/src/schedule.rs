//! Cooperative scheduling primitives.
//!
//! Everything runs on one dispatcher: a scheduled action is just a deadline
//! that the owner checks on its next poll. One-shot deadlines carry the epoch
//! of the stage that armed them, so an action armed for a stage that has since
//! been left is dropped instead of executed.

use std::time::{Duration, Instant};

/// Generation counter, bumped on every stage transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(u64);

impl Epoch {
    pub fn bump(&mut self) -> Epoch {
        self.0 = self.0.wrapping_add(1);
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fired {
    NotYet,
    Due,
    /// Armed for an epoch that is no longer live.
    Stale,
}

/// One-shot action armed at a given epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub at: Instant,
    pub epoch: Epoch,
}

impl Deadline {
    pub fn after(now: Instant, delay: Duration, epoch: Epoch) -> Self {
        Self { at: now + delay, epoch }
    }

    pub fn fire(&self, now: Instant, live: Epoch) -> Fired {
        if self.epoch != live {
            Fired::Stale
        } else if now >= self.at {
            Fired::Due
        } else {
            Fired::NotYet
        }
    }
}

/// Periodic tick. The first poll after `start` is due immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repeat {
    period: Duration,
    next: Instant,
}

impl Repeat {
    pub fn start(now: Instant, period: Duration) -> Self {
        Self { period, next: now }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// True when the tick is due; the next one is then scheduled one period out.
    pub fn due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        // Skip missed ticks rather than bursting to catch up.
        self.next = now + self.period;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_fires_only_for_live_epoch() {
        let t0 = Instant::now();
        let mut epoch = Epoch::default();
        let armed = epoch.bump();
        let d = Deadline::after(t0, Duration::from_millis(500), armed);

        assert_eq!(d.fire(t0, epoch), Fired::NotYet);
        assert_eq!(d.fire(t0 + Duration::from_millis(500), epoch), Fired::Due);

        epoch.bump();
        assert_eq!(d.fire(t0 + Duration::from_millis(600), epoch), Fired::Stale);
    }

    #[test]
    fn stale_wins_even_before_due() {
        let t0 = Instant::now();
        let mut epoch = Epoch::default();
        let d = Deadline::after(t0, Duration::from_secs(10), epoch);
        epoch.bump();
        assert_eq!(d.fire(t0, epoch), Fired::Stale);
    }

    #[test]
    fn repeat_is_due_immediately_then_periodic() {
        let t0 = Instant::now();
        let mut r = Repeat::start(t0, Duration::from_millis(100));
        assert!(r.due(t0));
        assert!(!r.due(t0 + Duration::from_millis(50)));
        assert!(r.due(t0 + Duration::from_millis(100)));
        // A late poll does not produce a burst of catch-up ticks.
        assert!(r.due(t0 + Duration::from_millis(450)));
        assert!(!r.due(t0 + Duration::from_millis(500)));
    }
}
