//! Authority catalog: AcoustID + MusicBrainz
//!
//! With a fingerprint the adapter asks AcoustID for recording ids, keeps
//! results scoring at least `acoustid_min_score`, then pulls the best one's
//! full MusicBrainz recording (releases, ISRCs, tags). Without a usable
//! fingerprint match it falls back to a direct recording lookup when the
//! hint carries an MBID, else to a MusicBrainz text search.
//!
//! API Documentation: https://musicbrainz.org/doc/MusicBrainz_API

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use super::http::{self, non_empty, year_of, RequestPacer};
use super::SourceAdapter;
use crate::error::SourceError;
use crate::services::filename_parser::is_probable_compilation;
use crate::types::{CandidateMatch, EditorialFields, FingerprintResult, IdentityHint, SourceKind};

const MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const ACOUSTID_LOOKUP_URL: &str = "https://api.acoustid.org/v2/lookup";

/// MusicBrainz policy: one request per second
const MUSICBRAINZ_MIN_INTERVAL: Duration = Duration::from_millis(1000);
/// AcoustID policy: three requests per second
const ACOUSTID_MIN_INTERVAL: Duration = Duration::from_millis(334);

const RECORDING_INC: &str = "artists+releases+release-groups+isrcs+tags+genres";
const MAX_CANDIDATES: usize = 5;
const MAX_STYLES: usize = 5;

/// AcoustID error code for a bad client key
const ACOUSTID_INVALID_KEY: i64 = 4;

const SOURCE: SourceKind = SourceKind::Authority;

// ============================================================================
// AcoustID response
// ============================================================================

#[derive(Debug, Deserialize)]
struct AcoustIdResponse {
    status: String,
    #[serde(default)]
    results: Vec<AcoustIdResult>,
    error: Option<AcoustIdErrorBody>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdErrorBody {
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct AcoustIdResult {
    score: f64,
    #[serde(default)]
    recordings: Vec<AcoustIdRecording>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdRecording {
    id: String,
    title: Option<String>,
    #[serde(default)]
    artists: Vec<AcoustIdArtist>,
    /// Seconds
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AcoustIdArtist {
    name: String,
    joinphrase: Option<String>,
}

// ============================================================================
// MusicBrainz response
// ============================================================================

#[derive(Debug, Deserialize)]
struct MbRecording {
    id: String,
    title: Option<String>,
    /// Milliseconds
    length: Option<u64>,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<MbArtistCredit>,
    #[serde(default)]
    releases: Vec<MbRelease>,
    #[serde(default)]
    isrcs: Vec<String>,
    #[serde(default)]
    tags: Vec<MbTag>,
    #[serde(default)]
    genres: Vec<MbTag>,
}

#[derive(Debug, Deserialize)]
struct MbArtistCredit {
    name: String,
    #[serde(default)]
    joinphrase: String,
}

#[derive(Debug, Deserialize)]
struct MbRelease {
    title: String,
    date: Option<String>,
    status: Option<String>,
    #[serde(rename = "release-group")]
    release_group: Option<MbReleaseGroup>,
}

#[derive(Debug, Deserialize)]
struct MbReleaseGroup {
    #[serde(rename = "secondary-types", default)]
    secondary_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MbTag {
    name: String,
    #[serde(default)]
    count: i64,
}

#[derive(Debug, Deserialize)]
struct MbSearchResponse {
    #[serde(default)]
    recordings: Vec<MbRecording>,
}

// ============================================================================
// Client
// ============================================================================

pub struct MusicBrainzClient {
    client: reqwest::Client,
    base_url: String,
    acoustid_url: String,
    acoustid_api_key: Option<String>,
    acoustid_min_score: f64,
    mb_pacer: RequestPacer,
    acoustid_pacer: RequestPacer,
}

impl MusicBrainzClient {
    /// Without an AcoustID key the adapter only does MBID lookups and text search
    pub fn new(acoustid_api_key: Option<String>, acoustid_min_score: f64) -> Result<Self, SourceError> {
        if acoustid_api_key.is_none() {
            tracing::warn!("No AcoustID API key configured; fingerprint lookups disabled");
        }
        Ok(Self {
            client: http::build_client(SOURCE)?,
            base_url: MUSICBRAINZ_BASE_URL.to_string(),
            acoustid_url: ACOUSTID_LOOKUP_URL.to_string(),
            acoustid_api_key,
            acoustid_min_score,
            mb_pacer: RequestPacer::new(MUSICBRAINZ_MIN_INTERVAL),
            acoustid_pacer: RequestPacer::new(ACOUSTID_MIN_INTERVAL),
        })
    }

    /// Fingerprint → AcoustID candidates, best score first
    async fn lookup_fingerprint(
        &self,
        api_key: &str,
        fingerprint: &FingerprintResult,
    ) -> Result<Vec<CandidateMatch>, SourceError> {
        self.acoustid_pacer.wait().await;

        let duration = fingerprint.measured_duration_seconds.round().max(0.0) as u64;
        let params = [
            ("client", api_key.to_string()),
            ("meta", "recordings".to_string()),
            ("format", "json".to_string()),
            ("duration", duration.to_string()),
            ("fingerprint", fingerprint.fingerprint_hash.clone()),
        ];

        tracing::debug!(duration_seconds = duration, "Querying AcoustID");

        let request = self.client.post(&self.acoustid_url).form(&params);
        match http::fetch_json::<AcoustIdResponse>(SOURCE, request).await? {
            Some(response) => normalize_acoustid(response, self.acoustid_min_score),
            None => Ok(Vec::new()),
        }
    }

    /// Full recording by MBID; `None` when MusicBrainz has no such recording
    async fn lookup_recording(&self, mbid: &str) -> Result<Option<CandidateMatch>, SourceError> {
        self.mb_pacer.wait().await;

        let url = format!("{}/recording/{}", self.base_url, mbid);
        let request = self
            .client
            .get(&url)
            .query(&[("inc", RECORDING_INC), ("fmt", "json")]);

        tracing::debug!(mbid = %mbid, "Looking up MusicBrainz recording");

        Ok(http::fetch_json::<MbRecording>(SOURCE, request)
            .await?
            .and_then(|recording| normalize_recording(&recording)))
    }

    async fn search_recordings(&self, text: &str) -> Result<Vec<CandidateMatch>, SourceError> {
        let query = lucene_terms(text);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        self.mb_pacer.wait().await;

        let url = format!("{}/recording", self.base_url);
        let limit = MAX_CANDIDATES.to_string();
        let request = self.client.get(&url).query(&[
            ("query", query.as_str()),
            ("limit", limit.as_str()),
            ("fmt", "json"),
        ]);

        tracing::debug!(query = %query, "Searching MusicBrainz recordings");

        Ok(http::fetch_json::<MbSearchResponse>(SOURCE, request)
            .await?
            .map(|response| normalize_search(&response))
            .unwrap_or_default())
    }
}

#[async_trait]
impl SourceAdapter for MusicBrainzClient {
    fn kind(&self) -> SourceKind {
        SOURCE
    }

    async fn query(&self, hint: &IdentityHint) -> Result<Vec<CandidateMatch>, SourceError> {
        let mut candidates = Vec::new();

        if let (Some(fingerprint), Some(api_key)) = (&hint.fingerprint, &self.acoustid_api_key) {
            candidates = self.lookup_fingerprint(api_key, fingerprint).await?;

            // Only the best match is worth a detail lookup
            if let Some(top) = candidates.first() {
                let score = top.fingerprint_score;
                if let Some(mut detailed) = self.lookup_recording(&top.external_id).await? {
                    detailed.fingerprint_score = score;
                    candidates[0] = detailed;
                }
            }
        }

        if candidates.is_empty() {
            if let Some(mbid) = hint.external_id.as_deref() {
                candidates.extend(self.lookup_recording(mbid).await?);
            } else if let Some(text) = hint.text.as_deref() {
                candidates = self.search_recordings(text).await?;
            }
        }

        tracing::debug!(count = candidates.len(), "Authority candidates");
        Ok(candidates)
    }
}

// ============================================================================
// Normalization
// ============================================================================

fn normalize_acoustid(response: AcoustIdResponse, min_score: f64) -> Result<Vec<CandidateMatch>, SourceError> {
    if response.status != "ok" {
        let (code, message) = response
            .error
            .map(|e| (e.code, e.message))
            .unwrap_or((None, String::new()));
        let message = match code {
            Some(ACOUSTID_INVALID_KEY) => format!("AcoustID rejected the API key: {}", message),
            _ => format!("AcoustID error {:?}: {}", code, message),
        };
        return Err(SourceError::permanent(SOURCE, message));
    }

    let mut results = response.results;
    results.retain(|r| r.score >= min_score);
    results.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for result in results {
        let score = result.score;
        for recording in result.recordings {
            if !seen.insert(recording.id.clone()) {
                continue;
            }
            let Some(title) = non_empty(recording.title.as_deref()) else {
                continue;
            };
            let artist = join_credits(
                recording
                    .artists
                    .iter()
                    .map(|a| (a.name.as_str(), a.joinphrase.as_deref().unwrap_or(""))),
            );
            if artist.is_empty() {
                continue;
            }
            candidates.push(
                CandidateMatch::new(SOURCE, recording.id, title, artist, recording.duration)
                    .with_fingerprint_score(score),
            );
        }
    }

    candidates.truncate(MAX_CANDIDATES);
    Ok(candidates)
}

fn normalize_recording(recording: &MbRecording) -> Option<CandidateMatch> {
    let title = non_empty(recording.title.as_deref())?;
    let artist = join_credits(
        recording
            .artist_credit
            .iter()
            .map(|c| (c.name.as_str(), c.joinphrase.as_str())),
    );
    if artist.is_empty() {
        return None;
    }

    let release = select_release(&recording.releases, &title);
    let editorial = EditorialFields {
        album: release.map(|r| r.title.clone()),
        release_year: release.and_then(|r| year_of(r.date.as_deref())),
        styles: top_tags(&recording.tags, &recording.genres),
        ..Default::default()
    };

    let mut candidate = CandidateMatch::new(
        SOURCE,
        recording.id.clone(),
        title,
        artist,
        recording.length.map(|ms| ms as f64 / 1000.0),
    )
    .with_editorial(editorial);

    if let Some(isrc) = recording.isrcs.first() {
        candidate = candidate.with_isrc(isrc.clone());
    }
    Some(candidate)
}

fn normalize_search(response: &MbSearchResponse) -> Vec<CandidateMatch> {
    response
        .recordings
        .iter()
        .filter_map(normalize_recording)
        .take(MAX_CANDIDATES)
        .collect()
}

/// "A feat. B" from credited names and their join phrases
fn join_credits<'a>(credits: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut joined = String::new();
    for (name, joinphrase) in credits {
        joined.push_str(name);
        joined.push_str(joinphrase);
    }
    joined.trim().to_string()
}

/// Preferred release: official, then same title as the recording (the
/// single), then not a compilation, then oldest
fn select_release<'a>(releases: &'a [MbRelease], recording_title: &str) -> Option<&'a MbRelease> {
    releases.iter().min_by_key(|r| {
        let official = r
            .status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("official"))
            .unwrap_or(false);
        let same_title = r.title.eq_ignore_ascii_case(recording_title);
        let compilation = r
            .release_group
            .as_ref()
            .map(|g| g.secondary_types.iter().any(|t| t.eq_ignore_ascii_case("compilation")))
            .unwrap_or(false)
            || is_probable_compilation(&r.title);
        let date = r
            .date
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "9999".to_string());
        (!official, !same_title, compilation, date)
    })
}

/// Most-voted tags and genres, capitalized, deduplicated
fn top_tags(tags: &[MbTag], genres: &[MbTag]) -> Vec<String> {
    let mut all: Vec<&MbTag> = tags.iter().chain(genres.iter()).collect();
    all.sort_by(|a, b| b.count.cmp(&a.count));

    let mut seen = HashSet::new();
    all.into_iter()
        .filter(|t| !t.name.trim().is_empty() && seen.insert(t.name.trim().to_lowercase()))
        .map(|t| capitalize_words(t.name.trim()))
        .take(MAX_STYLES)
        .collect()
}

fn capitalize_words(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Free text with Lucene operators removed
fn lucene_terms(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\', '/',
    ];
    text.chars()
        .map(|c| if SPECIAL.contains(&c) { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceErrorKind;
    use serde_json::json;

    fn recording_fixture() -> MbRecording {
        serde_json::from_value(json!({
            "id": "b6a3b4d2-0000-4000-8000-000000000001",
            "title": "One More Time",
            "length": 320357,
            "artist-credit": [{ "name": "Daft Punk", "joinphrase": "" }],
            "isrcs": ["GBDUW0000053"],
            "releases": [
                {
                    "title": "Ultimate Dance Anthems",
                    "date": "1999-05-01",
                    "status": "Official",
                    "release-group": { "secondary-types": ["Compilation"] }
                },
                {
                    "title": "Discovery",
                    "date": "2001-03-12",
                    "status": "Official",
                    "release-group": { "secondary-types": [] }
                },
                {
                    "title": "One More Time",
                    "date": "2000-11-13",
                    "status": "Official",
                    "release-group": { "secondary-types": [] }
                },
                {
                    "title": "One More Time",
                    "date": "2000-01-01",
                    "status": "Bootleg"
                }
            ],
            "tags": [{ "name": "french house", "count": 7 }, { "name": "house", "count": 3 }],
            "genres": [{ "name": "House", "count": 5 }, { "name": "disco", "count": 1 }]
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_recording() {
        let candidate = normalize_recording(&recording_fixture()).unwrap();

        assert_eq!(candidate.source, SourceKind::Authority);
        assert_eq!(candidate.title, "One More Time");
        assert_eq!(candidate.artist, "Daft Punk");
        assert_eq!(candidate.duration_seconds, Some(320.357));
        assert_eq!(candidate.isrc.as_deref(), Some("GBDUW0000053"));
        // Official same-title single beats the album, the compilation and the bootleg
        assert_eq!(candidate.editorial.album.as_deref(), Some("One More Time"));
        assert_eq!(candidate.editorial.release_year, Some(2000));
        assert_eq!(candidate.editorial.styles, vec!["French House", "House", "Disco"]);
    }

    #[test]
    fn test_recording_without_title_or_artist_is_dropped() {
        let no_title: MbRecording = serde_json::from_value(json!({
            "id": "x", "artist-credit": [{ "name": "A" }]
        }))
        .unwrap();
        assert!(normalize_recording(&no_title).is_none());

        let no_artist: MbRecording = serde_json::from_value(json!({ "id": "x", "title": "T" })).unwrap();
        assert!(normalize_recording(&no_artist).is_none());
    }

    #[test]
    fn test_join_credits_keeps_join_phrases() {
        let credits = vec![("Calvin Harris", " feat. "), ("Rihanna", "")];
        assert_eq!(join_credits(credits.into_iter()), "Calvin Harris feat. Rihanna");
    }

    #[test]
    fn test_normalize_acoustid_filters_by_score() {
        let response: AcoustIdResponse = serde_json::from_value(json!({
            "status": "ok",
            "results": [
                {
                    "id": "low",
                    "score": 0.2,
                    "recordings": [{ "id": "mb-low", "title": "Wrong", "artists": [{ "name": "Nobody" }] }]
                },
                {
                    "id": "high",
                    "score": 0.93,
                    "recordings": [
                        { "id": "mb-1", "title": "Strobe", "duration": 633, "artists": [{ "name": "deadmau5" }] },
                        { "id": "mb-2" }
                    ]
                }
            ]
        }))
        .unwrap();

        let candidates = normalize_acoustid(response, 0.5).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].external_id, "mb-1");
        assert_eq!(candidates[0].artist, "deadmau5");
        assert_eq!(candidates[0].duration_seconds, Some(633.0));
        assert_eq!(candidates[0].fingerprint_score, Some(0.93));
    }

    #[test]
    fn test_acoustid_error_is_permanent() {
        let response: AcoustIdResponse = serde_json::from_value(json!({
            "status": "error",
            "error": { "code": 4, "message": "invalid API key" }
        }))
        .unwrap();

        let err = normalize_acoustid(response, 0.5).unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::Permanent);
        assert!(err.message.contains("API key"));
    }

    #[test]
    fn test_normalize_search_skips_unusable_entries() {
        let response: MbSearchResponse = serde_json::from_value(json!({
            "recordings": [
                { "id": "a", "title": "Levels", "length": 200000, "artist-credit": [{ "name": "Avicii" }] },
                { "id": "b", "title": "" }
            ]
        }))
        .unwrap();

        let candidates = normalize_search(&response);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].duration_seconds, Some(200.0));
        assert_eq!(candidates[0].fingerprint_score, None);
    }

    #[test]
    fn test_lucene_terms() {
        assert_eq!(lucene_terms("AC/DC - Back In Black (Live)"), "AC DC Back In Black Live");
        assert_eq!(lucene_terms("  !! "), "");
    }
}
