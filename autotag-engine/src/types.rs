//! Core data model for the identification & reconciliation engine
//!
//! Every value that flows between pipeline stages is defined here:
//! - **Input:** [`TrackIdentity`], [`FingerprintResult`]
//! - **Catalog output:** [`CandidateMatch`] (tagged by [`SourceKind`])
//! - **Scoring:** [`ScoredCandidate`], [`ExcludedCandidate`]
//! - **Fusion:** [`UnifiedTrackData`] with a per-field provenance map
//! - **Decision:** [`ConfidenceTier`], [`ApprovedAction`], [`TrackRecord`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub use autotag_common::events::ProcessingState;

use crate::services::filename_parser::{self, ParsedName};

// ============================================================================
// Sources
// ============================================================================

/// Catalog role in the query cascade
///
/// Declaration order is cascade order: authority → editorial → popularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Stable structural identity (AcoustID + MusicBrainz)
    Authority,
    /// Label-grade descriptive fields (Discogs)
    Editorial,
    /// Fallback text identification and consumption fields (Spotify)
    Popularity,
}

impl SourceKind {
    /// Cascade order
    pub const CASCADE: [SourceKind; 3] = [
        SourceKind::Authority,
        SourceKind::Editorial,
        SourceKind::Popularity,
    ];

    /// Lower value = higher priority (used for tie-breaks)
    pub fn priority(self) -> u8 {
        match self {
            SourceKind::Authority => 0,
            SourceKind::Editorial => 1,
            SourceKind::Popularity => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Authority => "authority",
            SourceKind::Editorial => "editorial",
            SourceKind::Popularity => "popularity",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DJ-relevant mix qualifier carried in a title
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixQualifier {
    Original,
    Extended,
    Club,
    Dub,
    RadioEdit,
    Remix,
    Instrumental,
    Edit,
}

// ============================================================================
// Pipeline input
// ============================================================================

/// Immutable per-file input, created once at pipeline entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackIdentity {
    /// Audio file path
    pub path: PathBuf,
    /// Title/artist/roles recovered from the filename (or local tags)
    pub parsed: ParsedName,
    /// Normalized title + artist tokens, qualifier words removed
    pub tokens: Vec<String>,
    /// Duration from local metadata, when known
    pub local_duration: Option<f64>,
}

impl TrackIdentity {
    /// Build the identity from the file name alone
    pub fn from_path(path: impl Into<PathBuf>, local_duration: Option<f64>) -> Self {
        let path = path.into();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parsed = filename_parser::parse_filename(&stem);
        let tokens = filename_parser::tokenize(&parsed.search_text());

        Self {
            path,
            parsed,
            tokens,
            local_duration,
        }
    }

    /// Prefer embedded tag values over the filename where present
    pub fn with_local_tags(mut self, title: Option<&str>, artist: Option<&str>) -> Self {
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        let artist = artist.map(str::trim).filter(|a| !a.is_empty());
        if title.is_none() && artist.is_none() {
            return self;
        }

        let title = title.map(str::to_string).unwrap_or_else(|| self.parsed.title.clone());
        let combined = match artist.map(str::to_string).or_else(|| self.parsed.artist.clone()) {
            Some(a) => format!("{} - {}", a, title),
            None => title,
        };
        self.parsed = filename_parser::parse_filename(&combined);
        self.tokens = filename_parser::tokenize(&self.parsed.search_text());
        self
    }

    /// Duration used for the tolerance filter: local metadata, else the
    /// fingerprinting service's measurement
    pub fn effective_duration(&self, fingerprint: Option<&FingerprintResult>) -> Option<f64> {
        self.local_duration
            .or_else(|| fingerprint.map(|f| f.measured_duration_seconds))
    }

    /// Free-text query for catalogs that search by text
    pub fn query_text(&self) -> String {
        self.parsed.search_text()
    }

    /// "Artist - Title" hint for catalogs that search artist and track apart
    pub fn hint_text(&self) -> String {
        match &self.parsed.artist {
            Some(artist) => format!("{} - {}", artist, self.parsed.title),
            None => self.parsed.title.clone(),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Output of the fingerprinting collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintResult {
    /// Opaque fingerprint (Chromaprint base64 for the default service)
    pub fingerprint_hash: String,
    /// Duration measured while fingerprinting
    pub measured_duration_seconds: f64,
}

/// Query hint passed down the cascade
///
/// A higher-priority stage's stable id travels in `external_id`; text and
/// duration are always populated when known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityHint {
    pub external_id: Option<String>,
    pub fingerprint: Option<FingerprintResult>,
    pub text: Option<String>,
    pub duration_hint: Option<f64>,
}

impl IdentityHint {
    pub fn text(text: impl Into<String>, duration_hint: Option<f64>) -> Self {
        Self {
            text: Some(text.into()),
            duration_hint,
            ..Default::default()
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: FingerprintResult) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Nothing to query with
    pub fn is_empty(&self) -> bool {
        self.external_id.is_none()
            && self.fingerprint.is_none()
            && self.text.as_deref().map(str::trim).unwrap_or("").is_empty()
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// Descriptive fields a catalog may attach to a candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorialFields {
    pub label: Option<String>,
    pub catalog_number: Option<String>,
    pub styles: Vec<String>,
    pub album: Option<String>,
    pub release_year: Option<i32>,
    pub cover_art_url: Option<String>,
    /// Popularity score (0-100)
    pub popularity: Option<u32>,
}

/// One catalog's proposed identity, produced only by an adapter's
/// normalization function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub source: SourceKind,
    pub external_id: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<f64>,
    pub isrc: Option<String>,
    #[serde(default)]
    pub editorial: EditorialFields,
    /// Acoustic match score (0.0-1.0) when the candidate came from a fingerprint lookup
    #[serde(default)]
    pub fingerprint_score: Option<f64>,
}

impl CandidateMatch {
    pub fn new(
        source: SourceKind,
        external_id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        duration_seconds: Option<f64>,
    ) -> Self {
        Self {
            source,
            external_id: external_id.into(),
            title: title.into(),
            artist: artist.into(),
            duration_seconds,
            isrc: None,
            editorial: EditorialFields::default(),
            fingerprint_score: None,
        }
    }

    pub fn with_editorial(mut self, editorial: EditorialFields) -> Self {
        self.editorial = editorial;
        self
    }

    pub fn with_isrc(mut self, isrc: impl Into<String>) -> Self {
        self.isrc = Some(isrc.into());
        self
    }

    pub fn with_fingerprint_score(mut self, score: f64) -> Self {
        self.fingerprint_score = Some(score.clamp(0.0, 1.0));
        self
    }

    /// "Artist - Title" used as the text hint for downstream stages
    pub fn display_text(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// How the local and candidate mix qualifiers relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualifierMatch {
    /// Both sides name the same qualifiers, or neither names any
    Agree,
    /// Exactly one side names a qualifier (down-weighted)
    OneSided,
}

/// Candidate that survived the filters, with its scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: CandidateMatch,
    /// Token similarity in [0, 1]
    pub text_similarity: f64,
    /// local − candidate duration, when both are known
    pub duration_delta_seconds: Option<f64>,
    /// Weighted composite in [0, 1]
    pub composite_score: f64,
    pub qualifier_match: QualifierMatch,
}

impl ScoredCandidate {
    pub fn source(&self) -> SourceKind {
        self.candidate.source
    }
}

/// Why a candidate never reached scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    DurationOutOfTolerance { delta_seconds: f64 },
    QualifierConflict {
        local: Vec<MixQualifier>,
        candidate: Vec<MixQualifier>,
    },
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionReason::DurationOutOfTolerance { delta_seconds } => {
                write!(f, "duration delta {:.1}s out of tolerance", delta_seconds)
            }
            ExclusionReason::QualifierConflict { local, candidate } => {
                write!(f, "mix qualifier conflict (local {:?}, candidate {:?})", local, candidate)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedCandidate {
    pub candidate: CandidateMatch,
    pub reason: ExclusionReason,
}

// ============================================================================
// Fused record
// ============================================================================

/// Fields tracked in the provenance map
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackField {
    Title,
    Artist,
    FeaturedArtists,
    Remixer,
    RecordingId,
    Album,
    Label,
    CatalogNumber,
    Styles,
    ReleaseYear,
    CoverArt,
    Popularity,
    Isrc,
}

impl TrackField {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackField::Title => "title",
            TrackField::Artist => "artist",
            TrackField::FeaturedArtists => "featured_artists",
            TrackField::Remixer => "remixer",
            TrackField::RecordingId => "recording_id",
            TrackField::Album => "album",
            TrackField::Label => "label",
            TrackField::CatalogNumber => "catalog_number",
            TrackField::Styles => "styles",
            TrackField::ReleaseYear => "release_year",
            TrackField::CoverArt => "cover_art",
            TrackField::Popularity => "popularity",
            TrackField::Isrc => "isrc",
        }
    }
}

/// Who supplied a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", content = "source", rename_all = "snake_case")]
pub enum FieldOrigin {
    Catalog(SourceKind),
    ManualOverride,
}

/// Final merged record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedTrackData {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub featured_artists: Vec<String>,
    pub remixer: Option<String>,
    /// Stable identity id (authority id when present)
    pub recording_id: Option<String>,
    /// Every contributing source's own id
    pub external_ids: BTreeMap<SourceKind, String>,
    pub album: Option<String>,
    pub label: Option<String>,
    pub catalog_number: Option<String>,
    pub styles: Vec<String>,
    pub release_year: Option<i32>,
    pub cover_art_url: Option<String>,
    pub popularity: Option<u32>,
    pub isrc: Option<String>,
    /// Composite score of the identity candidate
    pub confidence: f64,
    /// Source of the identity candidate
    pub identity_source: Option<SourceKind>,
    pub provenance: BTreeMap<TrackField, FieldOrigin>,
}

impl UnifiedTrackData {
    pub fn origin_of(&self, field: TrackField) -> Option<FieldOrigin> {
        self.provenance.get(&field).copied()
    }

    /// Replace the named fields, marking them as manually supplied.
    ///
    /// Fields the override leaves as `None`, blank strings and empty lists
    /// keep both value and provenance. Returns the fields that changed.
    pub fn apply_override(&mut self, ov: &ManualOverride) -> Vec<TrackField> {
        let mut changed = Vec::new();

        macro_rules! set_text {
            ($src:expr, $dst:expr, $field:expr) => {
                if let Some(value) = $src.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                    $dst = Some(value.to_string());
                    changed.push($field);
                }
            };
        }
        macro_rules! set_list {
            ($src:expr, $dst:expr, $field:expr) => {
                if let Some(values) = $src.as_ref().filter(|v| !v.is_empty()) {
                    $dst = values.clone();
                    changed.push($field);
                }
            };
        }

        set_text!(ov.title, self.title, TrackField::Title);
        set_text!(ov.artist, self.artist, TrackField::Artist);
        set_text!(ov.remixer, self.remixer, TrackField::Remixer);
        set_text!(ov.album, self.album, TrackField::Album);
        set_text!(ov.label, self.label, TrackField::Label);
        set_text!(ov.catalog_number, self.catalog_number, TrackField::CatalogNumber);
        set_text!(ov.isrc, self.isrc, TrackField::Isrc);
        if let Some(year) = ov.release_year {
            self.release_year = Some(year);
            changed.push(TrackField::ReleaseYear);
        }

        set_list!(ov.featured_artists, self.featured_artists, TrackField::FeaturedArtists);
        set_list!(ov.styles, self.styles, TrackField::Styles);

        for field in &changed {
            self.provenance.insert(*field, FieldOrigin::ManualOverride);
        }
        changed
    }
}

/// Manually supplied replacement values for a decided record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub featured_artists: Option<Vec<String>>,
    pub remixer: Option<String>,
    pub album: Option<String>,
    pub label: Option<String>,
    pub catalog_number: Option<String>,
    pub styles: Option<Vec<String>>,
    pub release_year: Option<i32>,
    pub isrc: Option<String>,
}

// ============================================================================
// Decision
// ============================================================================

/// Action tier, a pure function of the identity candidate's composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceTier {
    High,
    Medium,
    Rejected,
}

/// What the tag writer is authorized to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApprovedAction {
    /// Rewrite tags and rename to `file_name` (HIGH)
    TagAndRename { file_name: String },
    /// Rewrite tags only (MEDIUM, after confirmation)
    TagOnly,
}

/// Plausibility of the fused identity against the local file's own text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SanityReport {
    /// Best token overlap between local text and "artist title"
    pub sanity_score: f64,
    pub artist_similarity: f64,
    pub title_similarity: f64,
    /// Name or tags carry download-site/rip markers
    pub is_rip: bool,
    /// Name or tags mark a mashup, bootleg or unofficial edit
    pub is_mashup_or_edit: bool,
}

impl SanityReport {
    pub fn flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.is_rip {
            flags.push("rip");
        }
        if self.is_mashup_or_edit {
            flags.push("mashup/edit");
        }
        flags
    }
}

/// Snapshot published to the result store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub batch_id: Uuid,
    pub identity: TrackIdentity,
    pub fingerprint: Option<FingerprintResult>,
    pub data: Option<UnifiedTrackData>,
    pub state: ProcessingState,
    pub tier: Option<ConfidenceTier>,
    pub action: Option<ApprovedAction>,
    /// Why the track was rejected or failed
    pub reason: Option<String>,
    /// Best candidate considered, for REJECTED/FAILED reporting
    pub best_candidate: Option<ScoredCandidate>,
    /// Informational only; never changes the tier
    #[serde(default)]
    pub sanity: Option<SanityReport>,
    pub updated_at: DateTime<Utc>,
}

impl TrackRecord {
    /// Fresh PENDING record for a track entering the pipeline
    pub fn new(batch_id: Uuid, identity: TrackIdentity) -> Self {
        Self {
            batch_id,
            identity,
            fingerprint: None,
            data: None,
            state: ProcessingState::Pending,
            tier: None,
            action: None,
            reason: None,
            best_candidate: None,
            sanity: None,
            updated_at: Utc::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.identity.path
    }
}

/// Manual verdict on a MEDIUM-tier track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Confirmation {
    Approve { overrides: Option<ManualOverride> },
    Reject { reason: Option<String> },
}

/// Qualifier set helper shared by parser and scorer
pub type QualifierSet = BTreeSet<MixQualifier>;
