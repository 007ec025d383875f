mod common;

use std::time::Duration;

use common::{Harness, Vessel};
use rode_types::{Command, Sequence};
use windlass_controller::RetrievalState;

fn lying_back(rode: f32) -> Vessel {
    let mut vessel = Vessel::at_anchor(8.0);
    vessel.rode = rode;
    vessel.distance = vessel.reach();
    vessel
}

#[test]
fn motoring_up_to_the_anchor_recovers_all_rode() {
    let mut vessel = lying_back(40.0);
    vessel.motoring = true;
    let mut h = Harness::new(vessel);

    let now = h.now;
    h.windlass.apply(Command::AutoRetrieve, now).unwrap();
    let finished = h.run_until(Duration::from_secs(900), |h| !h.windlass.retrieval().is_running());
    assert!(finished, "retrieval stuck in {}", h.windlass.retrieval().state());
    h.collect();

    assert!(h.windlass.retrieval().is_complete());
    assert_eq!(h.windlass.retrieval().state(), RetrievalState::Idle);
    assert!(h.vessel.rode <= 2.0);
    assert!(!h.relays.state().any());
    assert_eq!(h.relays.overlaps(), 0);
    assert_eq!(h.finished_count(Sequence::Retrieval), 1);

    let labels = h.stage_labels(Sequence::Retrieval);
    assert_eq!(labels.first().map(String::as_str), Some("Checking slack"));
    assert!(labels.iter().any(|l| l == "Raising"));
    assert_eq!(&labels[labels.len() - 2..], ["Complete", "Idle"]);
}

#[test]
fn lying_back_without_slack_never_raises() {
    let mut h = Harness::new(lying_back(40.0));
    let now = h.now;
    h.windlass.apply(Command::AutoRetrieve, now).unwrap();

    h.run_until(Duration::from_secs(30), |_| false);
    assert!(h.windlass.retrieval().is_running());
    assert_eq!(h.windlass.retrieval().state(), RetrievalState::WaitingForSlack);
    assert_eq!(h.vessel.rode, 40.0);
    assert!(!h.relays.state().any());
}

#[test]
fn boat_falling_back_mid_raise_stops_the_windlass() {
    let mut vessel = lying_back(40.0);
    vessel.motoring = true;
    let mut h = Harness::new(vessel);
    let now = h.now;
    h.windlass.apply(Command::AutoRetrieve, now).unwrap();

    assert!(h.run_until(Duration::from_secs(120), |h| h.relays.state().raise));

    // Gust: the boat is blown back far beyond what the rode can reach.
    h.vessel.motoring = false;
    h.vessel.distance = h.vessel.rode + 5.0;
    // One retrieval tick is 100 ms: ten control ticks at most.
    let mut ticks = 0;
    while h.windlass.retrieval().state() != RetrievalState::WaitingForSlack {
        h.step();
        ticks += 1;
        assert!(ticks <= 10, "still raising after {ticks} ticks");
    }
    assert!(!h.windlass.actuator().is_active());
    assert!(!h.relays.state().raise);
}
