//! Published outputs: slack, stage labels, completion and relay changes.
//!
//! A thin handle over a `tokio::sync::broadcast` channel. Publishing never
//! blocks or fails; with no subscriber attached the event is discarded.

use tokio::sync::broadcast;
use tracing::trace;

use rode_types::TelemetryEvent;

/// Zero-argument completion notification, fired once per sequence run.
pub type CompletionCallback = Box<dyn FnMut() + Send>;

#[derive(Debug, Clone)]
pub struct Telemetry {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl Telemetry {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: TelemetryEvent) {
        trace!(?event, "publish");
        let _ = self.tx.send(event);
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Drain everything currently buffered on `rx`, skipping over lag gaps.
pub fn drain(rx: &mut broadcast::Receiver<TelemetryEvent>) -> Vec<TelemetryEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
