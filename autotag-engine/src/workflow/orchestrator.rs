//! Batch orchestrator
//!
//! One explicit instance per run holds the configuration, the shared
//! per-source rate limiter, the catalog adapters and the collaborators. It
//! drives a batch through a bounded worker pool
//! (`futures::stream::buffer_unordered`) and applies manual confirmations
//! for MEDIUM-tier tracks parked in DECIDED.

use autotag_common::events::{EventBus, TrackEvent};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::pipeline::{PipelineContext, TrackPipeline};
use super::TrackRun;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fusion::MetadataFuser;
use crate::services::candidate_scorer::CandidateScorer;
use crate::services::decision_policy::DecisionPolicy;
use crate::services::fingerprinter::FingerprintService;
use crate::services::metadata_extractor::local_identity;
use crate::services::result_store::{InMemoryResultStore, ResultStore};
use crate::services::tag_writer::{DryRunTagWriter, TagWriter};
use crate::sources::SourceAdapter;
use crate::types::{
    ConfidenceTier, Confirmation, ManualOverride, ProcessingState, SourceKind, TrackIdentity,
    TrackRecord,
};
use crate::utils::rate_limiter::RateLimiter;
use crate::utils::retry::RetryPolicy;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Final view of one batch, in input order
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub records: Vec<TrackRecord>,
}

impl BatchReport {
    pub fn count(&self, state: ProcessingState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }

    /// MEDIUM tracks parked in DECIDED
    pub fn awaiting_confirmation(&self) -> usize {
        self.count(ProcessingState::Decided)
    }

    pub fn record(&self, path: &Path) -> Option<&TrackRecord> {
        self.records.iter().find(|r| r.path() == path)
    }
}

pub struct OrchestratorBuilder {
    config: EngineConfig,
    fingerprinter: Arc<dyn FingerprintService>,
    adapters: BTreeMap<SourceKind, Arc<dyn SourceAdapter>>,
    store: Option<Arc<dyn ResultStore>>,
    writer: Option<Arc<dyn TagWriter>>,
    events: Option<EventBus>,
}

impl OrchestratorBuilder {
    /// Register the adapter for its [`SourceKind`], replacing any earlier one
    pub fn adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn writer(mut self, writer: Arc<dyn TagWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        for kind in SourceKind::CASCADE {
            if !self.adapters.contains_key(&kind) {
                warn!(source = %kind, "No adapter registered; stage will be skipped");
            }
        }

        let config = self.config;
        let ctx = PipelineContext {
            limiter: RateLimiter::new(&config),
            retry: RetryPolicy::from_config(&config),
            scorer: CandidateScorer::new(&config),
            fuser: MetadataFuser::new(config.medium_threshold),
            policy: DecisionPolicy::new(&config),
            adapters: self.adapters,
            fingerprinter: self.fingerprinter,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryResultStore::new())),
            writer: self.writer.unwrap_or_else(|| Arc::new(DryRunTagWriter)),
            events: self
                .events
                .unwrap_or_else(|| EventBus::new(DEFAULT_EVENT_CAPACITY)),
            config,
        };
        Ok(Orchestrator { ctx })
    }
}

pub struct Orchestrator {
    ctx: PipelineContext,
}

impl Orchestrator {
    pub fn builder(config: EngineConfig, fingerprinter: Arc<dyn FingerprintService>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            fingerprinter,
            adapters: BTreeMap::new(),
            store: None,
            writer: None,
            events: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn store(&self) -> Arc<dyn ResultStore> {
        self.ctx.store.clone()
    }

    pub fn events(&self) -> EventBus {
        self.ctx.events.clone()
    }

    /// Process files on disk, starting from their embedded tags and duration
    pub async fn run_paths(&self, paths: Vec<PathBuf>, cancel: &CancellationToken) -> Result<BatchReport> {
        let tracks = if cancel.is_cancelled() {
            paths.into_iter().map(|p| TrackIdentity::from_path(p, None)).collect()
        } else {
            let workers = self.ctx.config.max_concurrent_workers.max(1);
            stream::iter(paths).map(local_identity).buffered(workers).collect().await
        };
        self.run_batch(tracks, cancel).await
    }

    /// Process a batch with at most `max_concurrent_workers` tracks in flight
    ///
    /// The fingerprint service is health-checked first; if it is unreachable
    /// the batch fails before any track starts. Every other fault is isolated
    /// to its track.
    pub async fn run_batch(&self, tracks: Vec<TrackIdentity>, cancel: &CancellationToken) -> Result<BatchReport> {
        self.ctx
            .fingerprinter
            .health_check()
            .await
            .map_err(|e| EngineError::FingerprintServiceUnavailable(e.to_string()))?;

        let batch_id = Uuid::new_v4();
        let total = tracks.len();
        let workers = self.ctx.config.max_concurrent_workers.max(1);

        info!(batch_id = %batch_id, tracks = total, workers, "Batch started");
        self.ctx.events.emit_lossy(TrackEvent::BatchStarted {
            batch_id,
            total_tracks: total,
            timestamp: chrono::Utc::now(),
        });

        let pipeline = TrackPipeline::new(&self.ctx, batch_id, cancel);
        let pipeline = &pipeline;

        let mut indexed: Vec<(usize, TrackRecord)> = stream::iter(tracks.into_iter().enumerate())
            .map(|(index, identity)| async move { (index, pipeline.run(identity).await) })
            .buffer_unordered(workers)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        let report = BatchReport {
            batch_id,
            records: indexed.into_iter().map(|(_, record)| record).collect(),
        };

        info!(
            batch_id = %batch_id,
            committed = report.count(ProcessingState::Committed),
            rejected = report.count(ProcessingState::Rejected),
            failed = report.count(ProcessingState::Failed),
            cancelled = report.count(ProcessingState::Cancelled),
            awaiting_confirmation = report.awaiting_confirmation(),
            "Batch completed"
        );
        self.ctx.events.emit_lossy(TrackEvent::BatchCompleted {
            batch_id,
            committed: report.count(ProcessingState::Committed),
            rejected: report.count(ProcessingState::Rejected),
            failed: report.count(ProcessingState::Failed),
            cancelled: report.count(ProcessingState::Cancelled),
            awaiting_confirmation: report.awaiting_confirmation(),
            timestamp: chrono::Utc::now(),
        });

        Ok(report)
    }

    /// Queue a verdict through the result store and apply it
    pub async fn confirm(&self, path: &Path, confirmation: Confirmation) -> Result<TrackRecord> {
        let record = self
            .ctx
            .store
            .get_by_path(path)
            .await
            .ok_or_else(|| EngineError::UnknownTrack(path.display().to_string()))?;
        ensure_awaiting(&record)?;

        self.ctx.store.submit_confirmation(path, confirmation).await?;
        self.process_confirmations()
            .await
            .into_iter()
            .rev()
            .find(|r| r.path() == path)
            .ok_or_else(|| EngineError::InvalidState(format!("{} was not confirmed", path.display())))
    }

    /// Apply every verdict queued in the result store; returns the updated
    /// records. Verdicts for tracks not awaiting confirmation are logged and
    /// dropped.
    pub async fn process_confirmations(&self) -> Vec<TrackRecord> {
        let mut applied = Vec::new();
        for (path, confirmation) in self.ctx.store.drain_confirmations().await {
            match self.apply_confirmation(&path, confirmation).await {
                Ok(record) => applied.push(record),
                Err(e) => warn!(file = %path.display(), error = %e, "Confirmation ignored"),
            }
        }
        applied
    }

    async fn apply_confirmation(&self, path: &Path, confirmation: Confirmation) -> Result<TrackRecord> {
        let mut record = self
            .ctx
            .store
            .get_by_path(path)
            .await
            .ok_or_else(|| EngineError::UnknownTrack(path.display().to_string()))?;
        ensure_awaiting(&record)?;

        let mut run = TrackRun::resume(record.batch_id, path, record.state, self.ctx.events.clone());

        match confirmation {
            Confirmation::Approve { overrides } => {
                if let Some(overrides) = overrides {
                    self.override_fields(&mut record, &overrides)?;
                }
                info!(file = %path.display(), "Confirmation approved");
                self.ctx.commit(&mut run, &mut record).await?;
            }
            Confirmation::Reject { reason } => {
                let reason = reason.unwrap_or_else(|| "rejected on review".to_string());
                info!(file = %path.display(), reason = %reason, "Confirmation rejected");
                record.reason = Some(reason);
                run.transition_to(ProcessingState::Rejected)?;
            }
        }

        self.ctx.publish(&run, &mut record).await;
        Ok(record)
    }

    /// Replace fields of a decided or finished track by hand
    ///
    /// May be repeated; each call moves provenance to `ManualOverride` for
    /// the named fields only and republishes the record in its current
    /// state. Files of COMMITTED tracks are not rewritten.
    pub async fn apply_override(&self, path: &Path, overrides: ManualOverride) -> Result<TrackRecord> {
        let mut record = self
            .ctx
            .store
            .get_by_path(path)
            .await
            .ok_or_else(|| EngineError::UnknownTrack(path.display().to_string()))?;
        if record.state != ProcessingState::Decided && !record.state.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "{} is {} and cannot be overridden yet",
                path.display(),
                record.state
            )));
        }

        self.override_fields(&mut record, &overrides)?;
        let run = TrackRun::resume(record.batch_id, path, record.state, self.ctx.events.clone());
        self.ctx.publish(&run, &mut record).await;
        Ok(record)
    }

    fn override_fields(&self, record: &mut TrackRecord, overrides: &ManualOverride) -> Result<()> {
        let path = record.path().to_path_buf();
        let data = record.data.as_mut().ok_or_else(|| {
            EngineError::InvalidState(format!("{} has no track data to override", path.display()))
        })?;
        let fields = data.apply_override(overrides);
        if !fields.is_empty() {
            let names: Vec<String> = fields.iter().map(|f| f.as_str().to_string()).collect();
            info!(file = %path.display(), fields = ?names, "Manual override applied");
            self.ctx.events.emit_lossy(TrackEvent::ManualOverrideApplied {
                path,
                fields: names,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(())
    }
}

fn ensure_awaiting(record: &TrackRecord) -> Result<()> {
    if record.state != ProcessingState::Decided || record.tier != Some(ConfidenceTier::Medium) {
        return Err(EngineError::InvalidState(format!(
            "{} is {} and not awaiting confirmation",
            record.path().display(),
            record.state
        )));
    }
    Ok(())
}
