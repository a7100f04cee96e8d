//! Event types for the autotag event system
//!
//! Track lifecycle transitions and batch progress are broadcast on an
//! [`EventBus`]. Subscribers (CLI progress output, tests) receive every event
//! emitted after they subscribe.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Per-track lifecycle state
///
/// PENDING → FINGERPRINTING → IDENTIFIED → ENRICHING → SCORED → DECIDED →
/// {COMMITTED | REJECTED | FAILED}, plus CANCELLED for batch aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingState {
    /// Queued, no collaborator touched yet
    Pending,
    /// Waiting on the fingerprinting service
    Fingerprinting,
    /// Fingerprint available, authority catalog queried
    Identified,
    /// Editorial/popularity cascade running
    Enriching,
    /// Candidates scored and fused
    Scored,
    /// Tier applied; MEDIUM tracks park here awaiting confirmation
    Decided,
    /// Tag write (and rename, for HIGH) completed
    Committed,
    /// No safe action; file untouched
    Rejected,
    /// Unrecoverable pipeline fault
    Failed,
    /// Batch aborted before this track finished
    Cancelled,
}

impl ProcessingState {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingState::Committed
                | ProcessingState::Rejected
                | ProcessingState::Failed
                | ProcessingState::Cancelled
        )
    }

    /// Whether `self → next` is a legal lifecycle step
    pub fn can_transition_to(self, next: ProcessingState) -> bool {
        use ProcessingState::*;

        if self.is_terminal() {
            return false;
        }

        // Failure and cancellation are reachable from any live state
        if matches!(next, Failed | Cancelled) {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Fingerprinting)
                | (Fingerprinting, Identified)
                | (Identified, Enriching)
                | (Enriching, Scored)
                | (Scored, Decided)
                | (Scored, Rejected)
                | (Decided, Committed)
                | (Decided, Rejected)
        )
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessingState::Pending => "PENDING",
            ProcessingState::Fingerprinting => "FINGERPRINTING",
            ProcessingState::Identified => "IDENTIFIED",
            ProcessingState::Enriching => "ENRICHING",
            ProcessingState::Scored => "SCORED",
            ProcessingState::Decided => "DECIDED",
            ProcessingState::Committed => "COMMITTED",
            ProcessingState::Rejected => "REJECTED",
            ProcessingState::Failed => "FAILED",
            ProcessingState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Autotag event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TrackEvent {
    /// Batch accepted by the orchestrator
    BatchStarted {
        batch_id: Uuid,
        total_tracks: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track moved between lifecycle states
    TrackStateChanged {
        batch_id: Uuid,
        path: PathBuf,
        old_state: ProcessingState,
        new_state: ProcessingState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Manual override replaced fields on a decided record
    ManualOverrideApplied {
        path: PathBuf,
        /// Names of the overridden fields
        fields: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Batch finished (every track terminal or parked in DECIDED)
    BatchCompleted {
        batch_id: Uuid,
        committed: usize,
        rejected: usize,
        failed: usize,
        cancelled: usize,
        awaiting_confirmation: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution for track lifecycle events
///
/// Thin wrapper over `tokio::sync::broadcast`. Cloning the bus shares the
/// underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TrackEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    ///
    /// ```
    /// use autotag_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: TrackEvent,
    ) -> Result<usize, broadcast::error::SendError<TrackEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: TrackEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
