//! Editorial catalog: Discogs database search
//!
//! Searches releases by artist + track first; when that finds nothing the
//! query is relaxed (brackets, qualifier and featuring words removed) and
//! retried as free text. Supplies label, catalog number, styles, year and
//! cover art.
//!
//! API Documentation: https://www.discogs.com/developers

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

use super::http::{self, non_empty, year_of, RequestPacer};
use super::SourceAdapter;
use crate::error::SourceError;
use crate::services::filename_parser::{relaxed_query, split_artist_title};
use crate::types::{CandidateMatch, EditorialFields, IdentityHint, SourceKind};

const DISCOGS_BASE_URL: &str = "https://api.discogs.com";

/// Authenticated limit is 60 requests per minute
const DISCOGS_MIN_INTERVAL: Duration = Duration::from_millis(1000);

const PER_PAGE: usize = 5;

const SOURCE: SourceKind = SourceKind::Editorial;

/// Discogs disambiguates same-named artists with a numeric suffix: "Prince (2)"
static ARTIST_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\(\d+\)$").unwrap());

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: u64,
    /// "Artist - Release Title"
    title: Option<String>,
    /// Discogs returns the year as a string
    year: Option<String>,
    #[serde(default)]
    label: Vec<String>,
    catno: Option<String>,
    #[serde(default)]
    style: Vec<String>,
    #[serde(default)]
    genre: Vec<String>,
    cover_image: Option<String>,
}

pub struct DiscogsClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    pacer: RequestPacer,
}

impl DiscogsClient {
    pub fn new(token: String) -> Result<Self, SourceError> {
        Ok(Self {
            client: http::build_client(SOURCE)?,
            base_url: DISCOGS_BASE_URL.to_string(),
            token,
            pacer: RequestPacer::new(DISCOGS_MIN_INTERVAL),
        })
    }

    async fn search(&self, params: &[(&str, &str)]) -> Result<SearchResponse, SourceError> {
        self.pacer.wait().await;

        let per_page = PER_PAGE.to_string();
        let request = self
            .client
            .get(format!("{}/database/search", self.base_url))
            .header("Authorization", format!("Discogs token={}", self.token))
            .query(&[("type", "release"), ("per_page", per_page.as_str())])
            .query(params);

        Ok(http::fetch_json::<SearchResponse>(SOURCE, request)
            .await?
            .unwrap_or(SearchResponse { results: Vec::new() }))
    }
}

#[async_trait]
impl SourceAdapter for DiscogsClient {
    fn kind(&self) -> SourceKind {
        SOURCE
    }

    async fn query(&self, hint: &IdentityHint) -> Result<Vec<CandidateMatch>, SourceError> {
        let Some(text) = hint.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(Vec::new());
        };

        // Strict: artist + track fields
        if let (Some(artist), title) = split_artist_title(text) {
            tracing::debug!(artist = %artist, track = %title, "Discogs strict search");
            let response = self
                .search(&[("artist", artist.as_str()), ("track", title.as_str())])
                .await?;
            let candidates = normalize_search(response, Some(&title));
            if !candidates.is_empty() {
                return Ok(candidates);
            }
        }

        // Relaxed: free text without decorations
        let relaxed = relaxed_query(text);
        if relaxed.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(query = %relaxed, "Discogs relaxed search");
        let response = self.search(&[("q", relaxed.as_str())]).await?;
        Ok(normalize_search(response, None))
    }
}

/// Release results → candidates
///
/// A strict search matched on the track, so `matched_track` becomes the
/// candidate title and the release title becomes the album.
fn normalize_search(response: SearchResponse, matched_track: Option<&str>) -> Vec<CandidateMatch> {
    response
        .results
        .into_iter()
        .filter_map(|result| normalize_result(result, matched_track))
        .take(PER_PAGE)
        .collect()
}

fn normalize_result(result: SearchResult, matched_track: Option<&str>) -> Option<CandidateMatch> {
    let full_title = non_empty(result.title.as_deref())?;
    let (artist, release_title) = match full_title.split_once(" - ") {
        Some((artist, release)) => (clean_artist(artist), release.trim().to_string()),
        None => return None,
    };
    if artist.is_empty() || release_title.is_empty() {
        return None;
    }

    let title = matched_track
        .and_then(|t| non_empty(Some(t)))
        .unwrap_or_else(|| release_title.clone());

    let styles = if result.style.is_empty() {
        result.genre
    } else {
        result.style
    };

    let editorial = EditorialFields {
        label: result.label.first().and_then(|l| non_empty(Some(l.as_str()))),
        catalog_number: non_empty(result.catno.as_deref()).filter(|c| !c.eq_ignore_ascii_case("none")),
        styles,
        album: Some(release_title),
        release_year: year_of(result.year.as_deref()),
        cover_art_url: non_empty(result.cover_image.as_deref()),
        popularity: None,
    };

    Some(CandidateMatch::new(SOURCE, result.id.to_string(), title, artist, None).with_editorial(editorial))
}

/// "Prince (2)" → "Prince", "Daft Punk*" → "Daft Punk"
fn clean_artist(artist: &str) -> String {
    let trimmed = artist.trim().trim_end_matches('*');
    ARTIST_SUFFIX.replace(trimmed, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response() -> SearchResponse {
        serde_json::from_value(json!({
            "pagination": { "items": 3 },
            "results": [
                {
                    "id": 28461,
                    "title": "Daft Punk - One More Time",
                    "year": "2000",
                    "label": ["Virgin", "Daft Trax"],
                    "catno": "VSCDT 1791",
                    "style": ["French House"],
                    "genre": ["Electronic"],
                    "cover_image": "https://img.discogs.com/cover.jpg"
                },
                {
                    "id": 99,
                    "title": "Prince (2) - Untitled",
                    "year": "",
                    "catno": "none",
                    "genre": ["Electronic"]
                },
                { "id": 7, "title": "Missing separator" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_strict_search_uses_matched_track_as_title() {
        let candidates = normalize_search(response(), Some("One More Time (Radio Edit)"));

        assert_eq!(candidates.len(), 2);
        let first = &candidates[0];
        assert_eq!(first.source, SourceKind::Editorial);
        assert_eq!(first.external_id, "28461");
        assert_eq!(first.title, "One More Time (Radio Edit)");
        assert_eq!(first.artist, "Daft Punk");
        assert_eq!(first.duration_seconds, None);
        assert_eq!(first.editorial.label.as_deref(), Some("Virgin"));
        assert_eq!(first.editorial.catalog_number.as_deref(), Some("VSCDT 1791"));
        assert_eq!(first.editorial.styles, vec!["French House"]);
        assert_eq!(first.editorial.album.as_deref(), Some("One More Time"));
        assert_eq!(first.editorial.release_year, Some(2000));
    }

    #[test]
    fn test_relaxed_search_uses_release_title() {
        let candidates = normalize_search(response(), None);
        let second = &candidates[1];

        assert_eq!(second.title, "Untitled");
        assert_eq!(second.artist, "Prince");
        assert_eq!(second.editorial.catalog_number, None);
        assert_eq!(second.editorial.release_year, None);
        // Genre stands in when no style is given
        assert_eq!(second.editorial.styles, vec!["Electronic"]);
    }

    #[test]
    fn test_clean_artist() {
        assert_eq!(clean_artist("Prince (2)"), "Prince");
        assert_eq!(clean_artist("Daft Punk*"), "Daft Punk");
        assert_eq!(clean_artist(" Moby "), "Moby");
    }

    #[test]
    fn test_empty_response() {
        let empty: SearchResponse = serde_json::from_value(json!({})).unwrap();
        assert!(normalize_search(empty, None).is_empty());
    }
}
