use std::sync::Mutex;

use broker_trait::{EventKind, NarrationEvent, NarrationSink};

/// Writes every narration event as a structured `tracing` event under the
/// `narration` target, so it can be filtered with `RUST_LOG=narration=info`.
#[derive(Debug, Default, Clone)]
pub struct TracingNarrator;

impl TracingNarrator {
    pub fn new() -> Self {
        Self
    }
}

impl NarrationSink for TracingNarrator {
    fn narrate(&self, event: NarrationEvent) {
        let kind = event.kind.as_str();
        let symbol = event.symbol.as_deref().unwrap_or("-");
        let venue = event.venue.as_deref().unwrap_or("-");
        let details = event.details.to_string();

        match event.kind {
            EventKind::Error | EventKind::AutonomousError | EventKind::AutonomousTradeFailed => {
                tracing::warn!(target: "narration", event = kind, symbol, venue, %details, "{}", kind)
            }
            EventKind::AutonomousHeartbeat | EventKind::PositionReassess | EventKind::HedgeSnapshot => {
                tracing::debug!(target: "narration", event = kind, symbol, venue, %details, "{}", kind)
            }
            _ => tracing::info!(target: "narration", event = kind, symbol, venue, %details, "{}", kind),
        }
    }
}

/// Keeps events in memory. Used by tests and by callers that want to inspect a cycle.
#[derive(Debug, Default)]
pub struct RecordingNarrator {
    events: Mutex<Vec<NarrationEvent>>,
}

impl RecordingNarrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NarrationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }

    pub fn last(&self, kind: EventKind) -> Option<NarrationEvent> {
        self.events().into_iter().rev().find(|e| e.kind == kind)
    }
}

impl NarrationSink for RecordingNarrator {
    fn narrate(&self, event: NarrationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
