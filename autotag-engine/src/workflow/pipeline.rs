//! Per-track pipeline
//!
//! One track moves through:
//! 1. FINGERPRINTING: opaque fingerprint + measured duration
//! 2. IDENTIFIED → ENRICHING: priority cascade authority → editorial → popularity
//! 3. SCORED: per-stage winners fused into one record
//! 4. DECIDED: tier and approved action; published to the result store
//! 5. COMMITTED / REJECTED / FAILED / CANCELLED
//!
//! Source failures are isolated to the stage that raised them; the cascade
//! always continues. Cancellation is checked between stages, so an in-flight
//! call completes and the track then ends CANCELLED.

use autotag_common::events::EventBus;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::TrackRun;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fusion::MetadataFuser;
use crate::services::candidate_scorer::{CandidateScorer, StageScores};
use crate::services::decision_policy::DecisionPolicy;
use crate::services::fingerprinter::FingerprintService;
use crate::services::result_store::ResultStore;
use crate::services::tag_writer::TagWriter;
use crate::services::text_sanity;
use crate::sources::SourceAdapter;
use crate::types::{
    ExcludedCandidate, ExclusionReason, FingerprintResult, IdentityHint, ProcessingState,
    ScoredCandidate, SourceKind, TrackIdentity, TrackRecord,
};
use crate::utils::rate_limiter::RateLimiter;
use crate::utils::retry::{retry_source_call, RetryPolicy};

pub const REASON_NO_MATCH: &str = "no match";
pub const REASON_NO_DURATION_VALID_MATCH: &str = "no duration-valid match";
pub const REASON_CANCELLED: &str = "batch cancelled";

/// Components shared by every worker of a batch
pub struct PipelineContext {
    pub config: EngineConfig,
    pub limiter: RateLimiter,
    pub retry: RetryPolicy,
    pub scorer: CandidateScorer,
    pub fuser: MetadataFuser,
    pub policy: DecisionPolicy,
    pub adapters: BTreeMap<SourceKind, Arc<dyn SourceAdapter>>,
    pub fingerprinter: Arc<dyn FingerprintService>,
    pub store: Arc<dyn ResultStore>,
    pub writer: Arc<dyn TagWriter>,
    pub events: EventBus,
}

impl PipelineContext {
    /// Stamp the record with the run's state and hand it to the store
    pub(crate) async fn publish(&self, run: &TrackRun, record: &mut TrackRecord) {
        record.state = run.state();
        record.updated_at = chrono::Utc::now();
        if let Err(e) = self.store.publish(record.clone()).await {
            error!(file = %record.path().display(), error = %e, "Failed to publish track record");
        }
    }

    /// Hand a DECIDED track to the tag writer; COMMITTED on success, FAILED otherwise
    pub(crate) async fn commit(&self, run: &mut TrackRun, record: &mut TrackRecord) -> Result<()> {
        let (Some(data), Some(tier), Some(action)) = (record.data.as_ref(), record.tier, record.action.as_ref())
        else {
            return Err(EngineError::Internal(format!(
                "{}: decided without data or action",
                record.path().display()
            )));
        };

        match self.writer.write(record.path(), data, tier, action).await {
            Ok(()) => run.transition_to(ProcessingState::Committed),
            Err(e) => {
                error!(file = %record.path().display(), error = %e, "Tag write failed");
                record.reason = Some(e.to_string());
                run.transition_to(ProcessingState::Failed)
            }
        }
    }
}

/// Top candidate of every stage that produced one, plus everything excluded
#[derive(Debug, Default)]
pub struct CascadeOutcome {
    /// Cascade order
    pub winners: Vec<ScoredCandidate>,
    pub excluded: Vec<ExcludedCandidate>,
}

impl CascadeOutcome {
    /// Keep the stage's exclusions and return its winner
    fn absorb(&mut self, stage: StageScores) -> Option<ScoredCandidate> {
        let top = stage.top().cloned();
        self.excluded.extend(stage.excluded);
        if let Some(winner) = &top {
            self.winners.push(winner.clone());
        }
        top
    }

    fn best_winner(&self) -> Option<&ScoredCandidate> {
        crate::services::candidate_scorer::top_candidate(&self.winners)
    }

    /// Why nothing survived: a duration exclusion names the closest miss
    fn rejection_reason(&self) -> String {
        let closest = self
            .excluded
            .iter()
            .filter_map(|e| match e.reason {
                ExclusionReason::DurationOutOfTolerance { delta_seconds } => Some((e, delta_seconds.abs())),
                _ => None,
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match closest {
            Some((excluded, delta)) => format!(
                "{} (closest: {}, Δ={:.1}s)",
                REASON_NO_DURATION_VALID_MATCH,
                excluded.candidate.display_text(),
                delta
            ),
            None => REASON_NO_MATCH.to_string(),
        }
    }
}

/// Drives one track through the pipeline
pub struct TrackPipeline<'a> {
    ctx: &'a PipelineContext,
    batch_id: Uuid,
    cancel: &'a CancellationToken,
}

impl<'a> TrackPipeline<'a> {
    pub fn new(ctx: &'a PipelineContext, batch_id: Uuid, cancel: &'a CancellationToken) -> Self {
        Self { ctx, batch_id, cancel }
    }

    /// Process one track. The returned record is DECIDED (awaiting
    /// confirmation) or terminal; it has already been published.
    ///
    /// A track cancelled before it starts is reported back CANCELLED but
    /// never published: the store only holds tracks the pipeline touched.
    pub async fn run(&self, identity: TrackIdentity) -> TrackRecord {
        let mut run = TrackRun::new(self.batch_id, identity.path.clone(), self.ctx.events.clone());
        let mut record = TrackRecord::new(self.batch_id, identity);

        if self.cancel.is_cancelled() {
            debug!(file = %record.path().display(), "Batch cancelled before track started");
            if let Err(e) = self.cancel_track(&mut run, &mut record) {
                error!(file = %record.path().display(), error = %e, "Cancellation failed");
            }
            record.state = run.state();
            return record;
        }

        if let Err(e) = self.process(&mut run, &mut record).await {
            error!(file = %record.path().display(), error = %e, "Track processing aborted");
            record.reason = Some(e.to_string());
            if !run.state().is_terminal() {
                // Failed is reachable from every live state
                let _ = run.transition_to(ProcessingState::Failed);
            }
        }

        if run.state().is_terminal() {
            self.ctx.publish(&run, &mut record).await;
        } else {
            record.state = run.state();
        }
        record
    }

    async fn process(&self, run: &mut TrackRun, record: &mut TrackRecord) -> Result<()> {
        // Fingerprint
        run.transition_to(ProcessingState::Fingerprinting)?;
        let fingerprint = match self.ctx.fingerprinter.identify(record.path()).await {
            Ok(fp) => fp,
            Err(e) => {
                error!(file = %record.path().display(), error = %e, "Fingerprinting failed");
                record.reason = Some(e.to_string());
                return run.transition_to(ProcessingState::Failed);
            }
        };
        record.fingerprint = Some(fingerprint.clone());
        if self.cancel.is_cancelled() {
            return self.cancel_track(run, record);
        }
        run.transition_to(ProcessingState::Identified)?;

        // Cascade
        run.transition_to(ProcessingState::Enriching)?;
        let duration = record.identity.effective_duration(Some(&fingerprint));
        let cascade = self.cascade(&record.identity, &fingerprint, duration).await;
        if self.cancel.is_cancelled() {
            return self.cancel_track(run, record);
        }

        // Score + fuse
        run.transition_to(ProcessingState::Scored)?;
        record.best_candidate = cascade.best_winner().cloned();
        let Some(data) = self.ctx.fuser.fuse(&cascade.winners) else {
            let reason = cascade.rejection_reason();
            info!(file = %record.path().display(), reason = %reason, "No surviving candidate");
            record.reason = Some(reason);
            return run.transition_to(ProcessingState::Rejected);
        };

        let sanity = text_sanity::analyze(&record.identity, &data);
        if !sanity.flags().is_empty() {
            warn!(
                file = %record.path().display(),
                flags = ?sanity.flags(),
                sanity_score = sanity.sanity_score,
                "Local name looks like a rip or unofficial edit"
            );
        }
        record.sanity = Some(sanity);

        // Decide
        let decision = self.ctx.policy.decide(&record.identity, &data);
        record.tier = Some(decision.tier);
        let confidence = data.confidence;
        record.data = Some(data);

        let Some(action) = decision.action else {
            record.reason = Some(format!(
                "confidence {:.3} below MEDIUM threshold {:.2}",
                confidence, self.ctx.config.medium_threshold
            ));
            info!(file = %record.path().display(), confidence, "Track rejected");
            return run.transition_to(ProcessingState::Rejected);
        };

        run.transition_to(ProcessingState::Decided)?;
        record.action = Some(action);
        self.ctx.publish(run, record).await;

        if decision.requires_confirmation {
            info!(
                file = %record.path().display(),
                confidence,
                "MEDIUM confidence; awaiting manual confirmation"
            );
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return self.cancel_track(run, record);
        }

        self.ctx.commit(run, record).await
    }

    fn cancel_track(&self, run: &mut TrackRun, record: &mut TrackRecord) -> Result<()> {
        record.reason = Some(REASON_CANCELLED.to_string());
        run.transition_to(ProcessingState::Cancelled)
    }

    /// Authority → editorial → popularity, with late editorial enrichment
    pub async fn cascade(
        &self,
        identity: &TrackIdentity,
        fingerprint: &FingerprintResult,
        duration: Option<f64>,
    ) -> CascadeOutcome {
        let mut outcome = CascadeOutcome::default();
        let local_text = identity.hint_text();

        // Authority: always attempted
        let hint = IdentityHint::text(local_text.clone(), duration).with_fingerprint(fingerprint.clone());
        let authority_top = match self.run_stage(SourceKind::Authority, &hint, identity, duration).await {
            Some(stage) => outcome.absorb(stage),
            None => None,
        };

        // Editorial: enrichment of an existing identity only
        let editorial_skipped = match &authority_top {
            Some(top) => {
                let hint = IdentityHint::text(top.candidate.display_text(), duration)
                    .with_external_id(top.candidate.external_id.clone());
                if let Some(stage) = self.run_stage(SourceKind::Editorial, &hint, identity, duration).await {
                    outcome.absorb(stage);
                }
                false
            }
            None => {
                debug!(file = %identity.path.display(), "No usable candidate yet; editorial stage skipped");
                true
            }
        };

        // Popularity: only while nothing reached HIGH
        let high = self.ctx.config.high_threshold;
        if outcome.winners.iter().any(|w| w.composite_score >= high) {
            debug!(file = %identity.path.display(), "HIGH candidate found; popularity stage skipped");
            return outcome;
        }

        let hint = IdentityHint::text(local_text, duration);
        let popularity_top = match self.run_stage(SourceKind::Popularity, &hint, identity, duration).await {
            Some(stage) => outcome.absorb(stage),
            None => None,
        };

        if editorial_skipped {
            if let Some(top) = popularity_top {
                debug!(file = %identity.path.display(), "Late editorial enrichment from popularity identity");
                let hint = IdentityHint::text(top.candidate.display_text(), duration);
                if let Some(stage) = self.run_stage(SourceKind::Editorial, &hint, identity, duration).await {
                    outcome.absorb(stage);
                }
            }
        }

        outcome
    }

    /// Query one source under the limiter and retry policy, then score.
    /// `None` when the stage was skipped or the source failed.
    async fn run_stage(
        &self,
        source: SourceKind,
        hint: &IdentityHint,
        identity: &TrackIdentity,
        duration: Option<f64>,
    ) -> Option<StageScores> {
        let Some(adapter) = self.ctx.adapters.get(&source) else {
            debug!(source = %source, "No adapter configured; stage skipped");
            return None;
        };
        if self.ctx.limiter.is_exhausted(source) {
            debug!(source = %source, file = %identity.path.display(), "Source failure budget exhausted; stage skipped");
            return None;
        }
        if self.cancel.is_cancelled() {
            return None;
        }

        let limiter = &self.ctx.limiter;
        let adapter = adapter.as_ref();
        let outcome = retry_source_call(source, &self.ctx.retry, self.cancel, move || async move {
            let _permit = limiter.acquire(source).await?;
            adapter.query(hint).await
        })
        .await;

        match outcome.result {
            Ok(candidates) => {
                limiter.record_success(source);
                let returned = candidates.len();
                let stage = self.ctx.scorer.score_all(identity, duration, candidates);
                debug!(
                    source = %source,
                    file = %identity.path.display(),
                    attempts = outcome.attempts,
                    returned,
                    survived = stage.scored.len(),
                    top_score = stage.top().map(|t| t.composite_score),
                    "Stage complete"
                );
                Some(stage)
            }
            Err(e) if self.cancel.is_cancelled() => {
                // Cancelled mid-backoff, not a source failure
                debug!(source = %source, file = %identity.path.display(), error = %e, "Stage abandoned on cancellation");
                None
            }
            Err(e) => {
                limiter.record_failure(source);
                warn!(
                    source = %source,
                    file = %identity.path.display(),
                    attempts = outcome.attempts,
                    error = %e,
                    "Source failed for this track; cascade continues"
                );
                None
            }
        }
    }
}
