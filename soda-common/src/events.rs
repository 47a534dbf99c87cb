//! Event types for curation progress reporting
//!
//! Provides the shared event definitions and EventBus used by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline stage a figure passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationStage {
    Segmentation,
    Detection,
    Reconciliation,
    Assignment,
}

impl CurationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurationStage::Segmentation => "segmentation",
            CurationStage::Detection => "detection",
            CurationStage::Reconciliation => "reconciliation",
            CurationStage::Assignment => "assignment",
        }
    }
}

/// Curation event types
///
/// Events are broadcast via EventBus and serialize with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CurationEvent {
    /// A figure entered the pipeline
    FigureStarted {
        session_id: Uuid,
        figure_label: String,
        timestamp: DateTime<Utc>,
    },

    /// A figure finished one pipeline stage
    StageCompleted {
        session_id: Uuid,
        figure_label: String,
        stage: CurationStage,
        /// Non-fatal problems raised during the stage
        warnings: usize,
        timestamp: DateTime<Utc>,
    },

    /// A verifier-gated step is being retried
    RetryAttempted {
        session_id: Uuid,
        figure_label: String,
        operation: String,
        attempt: u32,
        max_attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// A figure record was produced (possibly degraded)
    FigureCompleted {
        session_id: Uuid,
        figure_label: String,
        panel_count: usize,
        warnings: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A figure failed; siblings continue
    FigureFailed {
        session_id: Uuid,
        figure_label: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// All figures of a manuscript have been processed
    ManuscriptCompleted {
        session_id: Uuid,
        manuscript_id: String,
        total_figures: usize,
        failures: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl CurationEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            CurationEvent::FigureStarted { session_id, .. }
            | CurationEvent::StageCompleted { session_id, .. }
            | CurationEvent::RetryAttempted { session_id, .. }
            | CurationEvent::FigureCompleted { session_id, .. }
            | CurationEvent::FigureFailed { session_id, .. }
            | CurationEvent::ManuscriptCompleted { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast bus for curation events
///
/// Cloning the bus shares the underlying channel. Slow subscribers lose the
/// oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CurationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CurationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CurationEvent,
    ) -> Result<usize, broadcast::error::SendError<CurationEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CurationEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
