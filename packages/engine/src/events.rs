//! Change notification fan-out.

use job_core::ChangeEvent;
use tokio::sync::broadcast;

/// Broadcasts one [`ChangeEvent`] per committed transition.
///
/// Slow subscribers lag and lose the oldest events; the engine never waits
/// for them.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ChangeEvent) {
        tracing::trace!(event = %event.description(), "Change event");
        let _ = self.tx.send(event);
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}
