//! Candidate scoring
//!
//! Each catalog candidate goes through, in order:
//! 1. **Duration filter:** `|local − candidate| > tolerance` excludes it,
//!    whatever its text similarity
//! 2. **Qualifier check:** a local mix qualifier disjoint from the
//!    candidate's excludes it; a one-sided qualifier only down-weights
//! 3. **Composite:** `w_text·text + w_duration·(1 − |Δ|/tolerance) +
//!    w_authority·authority_weight`, clamped to [0, 1]
//!
//! `authority_weight` is the source's static weight, scaled by the acoustic
//! match score when the candidate came from a fingerprint lookup. A file
//! with an uninformative name can still reach MEDIUM on the waveform alone.
//!
//! A candidate without a duration gets a neutral proximity so that a missing
//! sub-score never zeroes the composite.

use tracing::debug;

use crate::config::{EngineConfig, ScoreWeights};
use crate::services::filename_parser::{detect_qualifiers, tokenize};
use crate::types::{
    CandidateMatch, ExcludedCandidate, ExclusionReason, MixQualifier, QualifierMatch,
    QualifierSet, ScoredCandidate, SourceKind, TrackIdentity,
};

/// Scores within this distance are ties, broken by source priority
pub const SCORE_EPSILON: f64 = 1e-3;

/// Text similarity multiplier when only one side names a mix qualifier
pub const QUALIFIER_MISMATCH_FACTOR: f64 = 0.85;

/// Duration proximity used when the candidate has no duration
const NEUTRAL_DURATION_PROXIMITY: f64 = 0.5;

/// How much a source's word counts toward the composite
pub fn source_authority_weight(source: SourceKind) -> f64 {
    match source {
        SourceKind::Authority => 1.0,
        SourceKind::Editorial => 0.8,
        SourceKind::Popularity => 0.6,
    }
}

/// Source weight, scaled by the fingerprint match score when there is one
pub fn candidate_authority_weight(candidate: &CandidateMatch) -> f64 {
    let base = source_authority_weight(candidate.source);
    match candidate.fingerprint_score {
        Some(score) => base * score.clamp(0.0, 1.0),
        None => base,
    }
}

/// Result of scoring one stage's candidates
#[derive(Debug, Clone, Default)]
pub struct StageScores {
    /// Survivors, best first
    pub scored: Vec<ScoredCandidate>,
    pub excluded: Vec<ExcludedCandidate>,
}

impl StageScores {
    /// Best survivor; near-ties go to the higher-priority source
    pub fn top(&self) -> Option<&ScoredCandidate> {
        top_candidate(&self.scored)
    }
}

pub struct CandidateScorer {
    tolerance: f64,
    weights: ScoreWeights,
}

impl CandidateScorer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            tolerance: config.duration_tolerance_sec,
            weights: config.weights,
        }
    }

    /// Score every candidate of one stage against the local identity
    pub fn score_all(
        &self,
        identity: &TrackIdentity,
        local_duration: Option<f64>,
        candidates: Vec<CandidateMatch>,
    ) -> StageScores {
        let mut stage = StageScores::default();

        for candidate in candidates {
            match self.score_one(identity, local_duration, &candidate) {
                Ok(scored) => stage.scored.push(scored),
                Err(reason) => {
                    debug!(
                        file = %identity.path.display(),
                        source = %candidate.source,
                        external_id = %candidate.external_id,
                        reason = %reason,
                        "Candidate excluded"
                    );
                    stage.excluded.push(ExcludedCandidate { candidate, reason });
                }
            }
        }

        rank(&mut stage.scored);
        stage
    }

    /// Score one candidate, or explain why it is excluded
    pub fn score_one(
        &self,
        identity: &TrackIdentity,
        local_duration: Option<f64>,
        candidate: &CandidateMatch,
    ) -> Result<ScoredCandidate, ExclusionReason> {
        // Duration filter runs before anything else
        let delta = match (local_duration, candidate.duration_seconds) {
            (Some(local), Some(remote)) => Some(local - remote),
            _ => None,
        };
        if let Some(d) = delta {
            if d.abs() > self.tolerance {
                return Err(ExclusionReason::DurationOutOfTolerance { delta_seconds: d });
            }
        }

        let candidate_qualifiers = detect_qualifiers(&candidate.title);
        let qualifier_match = compare_qualifiers(&identity.parsed.qualifiers, &candidate_qualifiers)?;

        let candidate_tokens = tokenize(&format!("{} {}", candidate.artist, candidate.title));
        let mut text = text_similarity(&identity.tokens, &candidate_tokens);
        if qualifier_match == QualifierMatch::OneSided {
            text *= QUALIFIER_MISMATCH_FACTOR;
        }

        let proximity = match delta {
            Some(d) => 1.0 - d.abs() / self.tolerance,
            None => NEUTRAL_DURATION_PROXIMITY,
        };

        let authority = candidate_authority_weight(candidate);
        let composite = (self.weights.text * text
            + self.weights.duration * proximity
            + self.weights.authority * authority)
        .clamp(0.0, 1.0);

        debug!(
            file = %identity.path.display(),
            source = %candidate.source,
            external_id = %candidate.external_id,
            text_similarity = text,
            duration_delta = ?delta,
            fingerprint_score = ?candidate.fingerprint_score,
            composite,
            "Candidate scored"
        );

        Ok(ScoredCandidate {
            candidate: candidate.clone(),
            text_similarity: text.clamp(0.0, 1.0),
            duration_delta_seconds: delta,
            composite_score: composite,
            qualifier_match,
        })
    }
}

/// Token similarity: the better of token-set Jaccard and normalized
/// Levenshtein over the sorted token strings
pub fn text_similarity(local: &[String], candidate: &[String]) -> f64 {
    if local.is_empty() || candidate.is_empty() {
        return 0.0;
    }

    let intersection = local.iter().filter(|t| candidate.contains(t)).count();
    let union = local.len() + candidate.iter().filter(|t| !local.contains(t)).count();
    let jaccard = intersection as f64 / union as f64;

    let mut a: Vec<&str> = local.iter().map(String::as_str).collect();
    let mut b: Vec<&str> = candidate.iter().map(String::as_str).collect();
    a.sort_unstable();
    b.sort_unstable();
    let edit = strsim::normalized_levenshtein(&a.join(" "), &b.join(" "));

    jaccard.max(edit).clamp(0.0, 1.0)
}

/// Compare mix qualifiers. "Original Mix" is what catalogs leave implicit,
/// so it counts as no qualifier.
fn compare_qualifiers(
    local: &QualifierSet,
    candidate: &QualifierSet,
) -> Result<QualifierMatch, ExclusionReason> {
    let strip = |set: &QualifierSet| -> QualifierSet {
        set.iter().copied().filter(|q| *q != MixQualifier::Original).collect()
    };
    let local = strip(local);
    let candidate = strip(candidate);

    if local == candidate {
        return Ok(QualifierMatch::Agree);
    }
    if !local.is_empty() && !candidate.is_empty() && local.is_disjoint(&candidate) {
        return Err(ExclusionReason::QualifierConflict {
            local: local.into_iter().collect(),
            candidate: candidate.into_iter().collect(),
        });
    }
    Ok(QualifierMatch::OneSided)
}

/// Sort best first; equal scores keep cascade priority order
pub fn rank(scored: &mut [ScoredCandidate]) {
    scored.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then_with(|| a.source().priority().cmp(&b.source().priority()))
    });
}

/// Best candidate. Anything within [`SCORE_EPSILON`] of the maximum is a
/// tie, resolved by source priority, then by original order.
pub fn top_candidate(scored: &[ScoredCandidate]) -> Option<&ScoredCandidate> {
    let best = scored
        .iter()
        .map(|s| s.composite_score)
        .max_by(|a, b| a.total_cmp(b))?;

    scored
        .iter()
        .filter(|s| best - s.composite_score <= SCORE_EPSILON)
        .min_by_key(|s| s.source().priority())
}
