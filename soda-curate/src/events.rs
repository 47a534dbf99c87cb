//! Session-scoped event emission
//!
//! Components that report progress hold an optional `EventSink`. Without one
//! they emit nothing; with one every event carries the session id.

use chrono::Utc;
use soda_common::events::{CurationEvent, CurationStage, EventBus};
use uuid::Uuid;

/// Event bus handle bound to one curation session
#[derive(Clone)]
pub struct EventSink {
    bus: EventBus,
    session_id: Uuid,
}

impl EventSink {
    pub fn new(bus: EventBus, session_id: Uuid) -> Self {
        Self { bus, session_id }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn figure_started(&self, figure_label: &str) {
        self.bus.emit_lossy(CurationEvent::FigureStarted {
            session_id: self.session_id,
            figure_label: figure_label.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn stage_completed(&self, figure_label: &str, stage: CurationStage, warnings: usize) {
        self.bus.emit_lossy(CurationEvent::StageCompleted {
            session_id: self.session_id,
            figure_label: figure_label.to_string(),
            stage,
            warnings,
            timestamp: Utc::now(),
        });
    }

    pub fn retry_attempted(&self, figure_label: &str, operation: &str, attempt: u32, max_attempts: u32) {
        self.bus.emit_lossy(CurationEvent::RetryAttempted {
            session_id: self.session_id,
            figure_label: figure_label.to_string(),
            operation: operation.to_string(),
            attempt,
            max_attempts,
            timestamp: Utc::now(),
        });
    }

    pub fn figure_completed(&self, figure_label: &str, panel_count: usize, warnings: usize, duration_ms: u64) {
        self.bus.emit_lossy(CurationEvent::FigureCompleted {
            session_id: self.session_id,
            figure_label: figure_label.to_string(),
            panel_count,
            warnings,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn figure_failed(&self, figure_label: &str, error: &str) {
        self.bus.emit_lossy(CurationEvent::FigureFailed {
            session_id: self.session_id,
            figure_label: figure_label.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn manuscript_completed(&self, manuscript_id: &str, total_figures: usize, failures: usize, duration_ms: u64) {
        self.bus.emit_lossy(CurationEvent::ManuscriptCompleted {
            session_id: self.session_id,
            manuscript_id: manuscript_id.to_string(),
            total_figures,
            failures,
            duration_ms,
            timestamp: Utc::now(),
        });
    }
}

/// Emit through an optional sink
pub(crate) fn emit_with(sink: Option<&EventSink>, f: impl FnOnce(&EventSink)) {
    if let Some(sink) = sink {
        f(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_carry_session_id() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let session_id = Uuid::new_v4();
        let sink = EventSink::new(bus, session_id);

        sink.retry_attempted("Figure 1", "split_panels", 2, 5);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), session_id);
        match event {
            CurationEvent::RetryAttempted { attempt, max_attempts, .. } => {
                assert_eq!((attempt, max_attempts), (2, 5));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_missing_sink_is_noop() {
        let mut called = false;
        emit_with(None, |_| called = true);
        assert!(!called);
    }
}
