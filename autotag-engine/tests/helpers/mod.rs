//! Test Helper Utilities
//!
//! Scripted collaborators for driving the orchestrator without network or
//! fpcalc, plus a tiny WAV builder for the few tests that need a real file.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use autotag_engine::error::{FingerprintError, SourceError, WriteError};
use autotag_engine::services::{FingerprintService, TagWriter};
use autotag_engine::sources::SourceAdapter;
use autotag_engine::types::{
    ApprovedAction, CandidateMatch, ConfidenceTier, EditorialFields, FingerprintResult,
    IdentityHint, SourceKind, UnifiedTrackData,
};
use autotag_engine::{EngineConfig, Orchestrator};

/// Engine defaults with rate limits and backoff shrunk so tests run instantly
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        per_source_rate_limit: 1000,
        rate_limit_interval_seconds: 1.0,
        per_source_concurrency: 8,
        backoff_base_seconds: 0.001,
        backoff_max_seconds: 0.01,
        ..Default::default()
    }
}

type Responder = dyn Fn(&IdentityHint, usize) -> Result<Vec<CandidateMatch>, SourceError> + Send + Sync;

/// Catalog adapter answering from a closure of (hint, zero-based call index)
pub struct MockAdapter {
    kind: SourceKind,
    responder: Box<Responder>,
    calls: AtomicUsize,
    hints: Mutex<Vec<IdentityHint>>,
}

impl MockAdapter {
    pub fn new<F>(kind: SourceKind, responder: F) -> Arc<Self>
    where
        F: Fn(&IdentityHint, usize) -> Result<Vec<CandidateMatch>, SourceError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            kind,
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            hints: Mutex::new(Vec::new()),
        })
    }

    /// Same candidates for every call
    pub fn returning(kind: SourceKind, candidates: Vec<CandidateMatch>) -> Arc<Self> {
        Self::new(kind, move |_, _| Ok(candidates.clone()))
    }

    /// Fails with a TRANSIENT error `failures` times, then returns `candidates`
    pub fn flaky(kind: SourceKind, failures: usize, candidates: Vec<CandidateMatch>) -> Arc<Self> {
        Self::new(kind, move |_, call| {
            if call < failures {
                Err(SourceError::transient(kind, "HTTP 502"))
            } else {
                Ok(candidates.clone())
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hints(&self) -> Vec<IdentityHint> {
        self.hints.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn query(&self, hint: &IdentityHint) -> Result<Vec<CandidateMatch>, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.hints.lock().unwrap().push(hint.clone());
        (self.responder)(hint, call)
    }
}

/// Fingerprinter with a fixed measured duration and per-path failures
pub struct MockFingerprinter {
    healthy: bool,
    duration: f64,
    failing: Mutex<HashMap<PathBuf, String>>,
    identify_calls: AtomicUsize,
}

impl MockFingerprinter {
    pub fn new(duration: f64) -> Arc<Self> {
        Arc::new(Self {
            healthy: true,
            duration,
            failing: Mutex::new(HashMap::new()),
            identify_calls: AtomicUsize::new(0),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            healthy: false,
            duration: 0.0,
            failing: Mutex::new(HashMap::new()),
            identify_calls: AtomicUsize::new(0),
        })
    }

    pub fn fail_on(&self, path: impl Into<PathBuf>, message: &str) {
        self.failing.lock().unwrap().insert(path.into(), message.to_string());
    }

    pub fn identify_calls(&self) -> usize {
        self.identify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FingerprintService for MockFingerprinter {
    async fn health_check(&self) -> Result<(), FingerprintError> {
        if self.healthy {
            Ok(())
        } else {
            Err(FingerprintError::Unreachable("connection refused".to_string()))
        }
    }

    async fn identify(&self, path: &Path) -> Result<FingerprintResult, FingerprintError> {
        self.identify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failing.lock().unwrap().get(path) {
            return Err(FingerprintError::Failed(message.clone()));
        }
        Ok(FingerprintResult {
            fingerprint_hash: format!("AQAA{}", path.display()),
            measured_duration_seconds: self.duration,
        })
    }
}

/// One call made to [`RecordingTagWriter`]
#[derive(Debug, Clone)]
pub struct WriteCall {
    pub path: PathBuf,
    pub data: UnifiedTrackData,
    pub tier: ConfidenceTier,
    pub action: ApprovedAction,
}

/// Tag writer that records every call instead of touching files
#[derive(Default)]
pub struct RecordingTagWriter {
    calls: Mutex<Vec<WriteCall>>,
    fail: bool,
}

impl RecordingTagWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TagWriter for RecordingTagWriter {
    async fn write(
        &self,
        path: &Path,
        data: &UnifiedTrackData,
        tier: ConfidenceTier,
        action: &ApprovedAction,
    ) -> Result<(), WriteError> {
        self.calls.lock().unwrap().push(WriteCall {
            path: path.to_path_buf(),
            data: data.clone(),
            tier,
            action: action.clone(),
        });
        if self.fail {
            return Err(WriteError::Tags("read-only filesystem".to_string()));
        }
        Ok(())
    }
}

/// Authority (MusicBrainz-shaped) candidate
pub fn authority(title: &str, artist: &str, duration: Option<f64>) -> CandidateMatch {
    CandidateMatch::new(SourceKind::Authority, "b1a9c0e2-mbid", title, artist, duration)
        .with_isrc("FRZ119900123")
}

/// Authority candidate found by fingerprint lookup at the given AcoustID score
pub fn fingerprinted(title: &str, artist: &str, duration: Option<f64>, score: f64) -> CandidateMatch {
    authority(title, artist, duration).with_fingerprint_score(score)
}

/// Editorial (Discogs-shaped) candidate carrying a label; never a duration
pub fn editorial(title: &str, artist: &str, label: &str) -> CandidateMatch {
    CandidateMatch::new(SourceKind::Editorial, "discogs-1234", title, artist, None).with_editorial(
        EditorialFields {
            label: Some(label.to_string()),
            catalog_number: Some("VIR 123".to_string()),
            styles: vec!["French House".to_string()],
            album: Some("Discovery".to_string()),
            release_year: Some(2001),
            ..Default::default()
        },
    )
}

/// Popularity (Spotify-shaped) candidate
pub fn popularity(title: &str, artist: &str, duration: Option<f64>) -> CandidateMatch {
    CandidateMatch::new(SourceKind::Popularity, "spotify:track:0DiW", title, artist, duration)
        .with_editorial(EditorialFields {
            label: Some("Parlophone".to_string()),
            album: Some("Discovery".to_string()),
            popularity: Some(78),
            cover_art_url: Some("https://i.scdn.co/image/ab67616d".to_string()),
            ..Default::default()
        })
        .with_isrc("GBDUW0000059")
}

/// Orchestrator wired to scripted collaborators, with handles for asserting
/// on what each one saw
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub fingerprinter: Arc<MockFingerprinter>,
    pub writer: Arc<RecordingTagWriter>,
    pub authority: Arc<MockAdapter>,
    pub editorial: Arc<MockAdapter>,
    pub popularity: Arc<MockAdapter>,
}

impl Harness {
    pub fn new(
        config: EngineConfig,
        authority: Arc<MockAdapter>,
        editorial: Arc<MockAdapter>,
        popularity: Arc<MockAdapter>,
    ) -> Self {
        Self::with_collaborators(
            config,
            authority,
            editorial,
            popularity,
            MockFingerprinter::new(320.0),
            RecordingTagWriter::new(),
        )
    }

    pub fn with_collaborators(
        config: EngineConfig,
        authority: Arc<MockAdapter>,
        editorial: Arc<MockAdapter>,
        popularity: Arc<MockAdapter>,
        fingerprinter: Arc<MockFingerprinter>,
        writer: Arc<RecordingTagWriter>,
    ) -> Self {
        let orchestrator = Orchestrator::builder(config, fingerprinter.clone())
            .adapter(authority.clone())
            .adapter(editorial.clone())
            .adapter(popularity.clone())
            .writer(writer.clone())
            .build()
            .expect("valid test configuration");

        Self {
            orchestrator,
            fingerprinter,
            writer,
            authority,
            editorial,
            popularity,
        }
    }
}

/// Adapter that never finds anything
pub fn empty(kind: SourceKind) -> Arc<MockAdapter> {
    MockAdapter::returning(kind, Vec::new())
}

/// One-second silent mono WAV carrying an ID3v2 title and artist
pub fn write_tagged_wav(path: &Path, title: &str, artist: &str) {
    use lofty::config::WriteOptions;
    use lofty::prelude::*;
    use lofty::tag::{Tag, TagType};

    let data_len: u32 = 44_100 * 2;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&44_100u32.to_le_bytes());
    bytes.extend_from_slice(&88_200u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0);
    std::fs::write(path, bytes).unwrap();

    let mut tag = Tag::new(TagType::Id3v2);
    tag.set_title(title.to_string());
    tag.set_artist(artist.to_string());
    tag.save_to_path(path, WriteOptions::default()).unwrap();
}
