//! Per-track workflow and batch orchestration
//!
//! - [`pipeline`]: one track through fingerprint → cascade → score → fuse → decide
//! - [`orchestrator`]: bounded worker pool, cancellation, confirmations
//!
//! [`TrackRun`] is the only place a track's [`ProcessingState`] changes.

pub mod orchestrator;
pub mod pipeline;

use autotag_common::events::{EventBus, TrackEvent};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::types::ProcessingState;

pub use orchestrator::{BatchReport, Orchestrator, OrchestratorBuilder};
pub use pipeline::TrackPipeline;

/// State holder for one track, owned by the worker processing it
pub struct TrackRun {
    batch_id: Uuid,
    path: PathBuf,
    state: ProcessingState,
    events: EventBus,
}

impl TrackRun {
    pub fn new(batch_id: Uuid, path: impl Into<PathBuf>, events: EventBus) -> Self {
        Self::resume(batch_id, path, ProcessingState::Pending, events)
    }

    /// Pick up a track already in `state` (a parked DECIDED track)
    pub fn resume(batch_id: Uuid, path: impl Into<PathBuf>, state: ProcessingState, events: EventBus) -> Self {
        Self {
            batch_id,
            path: path.into(),
            state,
            events,
        }
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow
    pub fn transition_to(&mut self, next: ProcessingState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidState(format!(
                "{}: {} → {} is not allowed",
                self.path.display(),
                self.state,
                next
            )));
        }

        let old_state = self.state;
        self.state = next;

        if next.is_terminal() {
            tracing::info!(file = %self.path.display(), from = %old_state, to = %next, "Track finished");
        } else {
            tracing::debug!(file = %self.path.display(), from = %old_state, to = %next, "Track state changed");
        }

        self.events.emit_lossy(TrackEvent::TrackStateChanged {
            batch_id: self.batch_id,
            path: self.path.clone(),
            old_state,
            new_state: next,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }
}
