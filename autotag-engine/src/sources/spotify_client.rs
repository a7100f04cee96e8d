//! Popularity catalog: Spotify Web API track search
//!
//! Client-credentials flow; the bearer token is cached until shortly before
//! it expires. A 401 on search drops the cached token and is reported as
//! TRANSIENT so the retry fetches a fresh one.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::http::{self, non_empty, year_of, RequestPacer};
use super::SourceAdapter;
use crate::error::SourceError;
use crate::services::filename_parser::split_artist_title;
use crate::types::{CandidateMatch, EditorialFields, IdentityHint, SourceKind};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SPOTIFY_BASE_URL: &str = "https://api.spotify.com/v1";

const SPOTIFY_MIN_INTERVAL: Duration = Duration::from_millis(100);
/// Refresh this long before the token actually expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const SEARCH_LIMIT: usize = 5;

const SOURCE: SourceKind = SourceKind::Popularity;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Option<TrackPage>,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
    duration_ms: Option<u64>,
    popularity: Option<u32>,
    external_ids: Option<SpotifyExternalIds>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    name: Option<String>,
    release_date: Option<String>,
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyExternalIds {
    isrc: Option<String>,
}

pub struct SpotifyClient {
    client: reqwest::Client,
    token_url: String,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
    pacer: RequestPacer,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Result<Self, SourceError> {
        Ok(Self {
            client: http::build_client(SOURCE)?,
            token_url: TOKEN_URL.to_string(),
            base_url: SPOTIFY_BASE_URL.to_string(),
            client_id,
            client_secret,
            token: Mutex::new(None),
            pacer: RequestPacer::new(SPOTIFY_MIN_INTERVAL),
        })
    }

    /// Cached bearer token, fetched when missing or about to expire
    async fn access_token(&self) -> Result<String, SourceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        tracing::debug!("Requesting Spotify access token");
        self.pacer.wait().await;

        let request = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")]);

        let response = http::fetch_json::<TokenResponse>(SOURCE, request)
            .await?
            .ok_or_else(|| SourceError::permanent(SOURCE, "token endpoint not found"))?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            access_token: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl SourceAdapter for SpotifyClient {
    fn kind(&self) -> SourceKind {
        SOURCE
    }

    async fn query(&self, hint: &IdentityHint) -> Result<Vec<CandidateMatch>, SourceError> {
        let Some(text) = hint.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(Vec::new());
        };
        let query = search_query(text);

        let token = self.access_token().await?;
        self.pacer.wait().await;

        tracing::debug!(query = %query, "Searching Spotify tracks");

        let limit = SEARCH_LIMIT.to_string();
        let request = self
            .client
            .get(format!("{}/search", self.base_url))
            .bearer_auth(&token)
            .query(&[("q", query.as_str()), ("type", "track"), ("limit", limit.as_str())]);

        match http::fetch_json::<SearchResponse>(SOURCE, request).await {
            Ok(response) => Ok(response.map(normalize_search).unwrap_or_default()),
            Err(err) if is_token_rejected(&err) => {
                self.invalidate_token().await;
                Err(SourceError::transient(SOURCE, "access token rejected; refreshing"))
            }
            Err(err) => Err(err),
        }
    }
}

fn is_token_rejected(err: &SourceError) -> bool {
    err.status == Some(StatusCode::UNAUTHORIZED.as_u16())
}

/// Field-scoped query when artist and title are known, else free text
fn search_query(text: &str) -> String {
    match split_artist_title(text) {
        (Some(artist), title) => format!("artist:{} track:{}", artist, title),
        (None, title) => title,
    }
}

fn normalize_search(response: SearchResponse) -> Vec<CandidateMatch> {
    response
        .tracks
        .map(|page| page.items)
        .unwrap_or_default()
        .into_iter()
        .filter_map(normalize_track)
        .take(SEARCH_LIMIT)
        .collect()
}

fn normalize_track(track: SpotifyTrack) -> Option<CandidateMatch> {
    let id = non_empty(track.id.as_deref())?;
    let title = non_empty(track.name.as_deref())?;
    let artist = track
        .artists
        .iter()
        .map(|a| a.name.trim())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if artist.is_empty() {
        return None;
    }

    let editorial = match &track.album {
        Some(album) => EditorialFields {
            album: non_empty(album.name.as_deref()),
            release_year: year_of(album.release_date.as_deref()),
            cover_art_url: album.images.first().map(|i| i.url.clone()),
            popularity: track.popularity,
            ..Default::default()
        },
        None => EditorialFields {
            popularity: track.popularity,
            ..Default::default()
        },
    };

    let mut candidate = CandidateMatch::new(
        SOURCE,
        id,
        title,
        artist,
        track.duration_ms.map(|ms| ms as f64 / 1000.0),
    )
    .with_editorial(editorial);

    if let Some(isrc) = track.external_ids.and_then(|e| non_empty(e.isrc.as_deref())) {
        candidate = candidate.with_isrc(isrc);
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_an_http_401_drops_the_token() {
        let unauthorized = http::classify_status(SOURCE, StatusCode::UNAUTHORIZED, None).unwrap();
        assert!(is_token_rejected(&unauthorized));

        let forbidden = http::classify_status(SOURCE, StatusCode::FORBIDDEN, None).unwrap();
        assert!(!is_token_rejected(&forbidden));

        // Status digits in a message are not a status
        let network = SourceError::transient(SOURCE, "Network error: connect to 10.0.0.401 failed");
        assert!(!is_token_rejected(&network));
    }

    #[test]
    fn test_search_query() {
        assert_eq!(search_query("Avicii - Levels"), "artist:Avicii track:Levels");
        assert_eq!(search_query("Levels"), "Levels");
    }

    #[test]
    fn test_normalize_track() {
        let response: SearchResponse = serde_json::from_value(json!({
            "tracks": {
                "items": [
                    {
                        "id": "5UqCQaDshqbIk3pkhy4Pjg",
                        "name": "Levels - Radio Edit",
                        "artists": [{ "name": "Avicii" }],
                        "album": {
                            "name": "Levels",
                            "release_date": "2011-10-28",
                            "images": [{ "url": "https://i.scdn.co/image/large" }, { "url": "https://i.scdn.co/image/small" }]
                        },
                        "duration_ms": 199906,
                        "popularity": 78,
                        "external_ids": { "isrc": "SE4ZT1100013" }
                    },
                    { "id": "no-artists", "name": "Orphan", "artists": [] },
                    { "name": "No id", "artists": [{ "name": "X" }] }
                ]
            }
        }))
        .unwrap();

        let candidates = normalize_search(response);

        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.source, SourceKind::Popularity);
        assert_eq!(c.title, "Levels - Radio Edit");
        assert_eq!(c.artist, "Avicii");
        assert_eq!(c.duration_seconds, Some(199.906));
        assert_eq!(c.isrc.as_deref(), Some("SE4ZT1100013"));
        assert_eq!(c.editorial.popularity, Some(78));
        assert_eq!(c.editorial.release_year, Some(2011));
        assert_eq!(c.editorial.cover_art_url.as_deref(), Some("https://i.scdn.co/image/large"));
    }

    #[test]
    fn test_multiple_artists_joined() {
        let track: SpotifyTrack = serde_json::from_value(json!({
            "id": "t",
            "name": "Titanium",
            "artists": [{ "name": "David Guetta" }, { "name": "Sia" }]
        }))
        .unwrap();

        let c = normalize_track(track).unwrap();
        assert_eq!(c.artist, "David Guetta, Sia");
        assert_eq!(c.editorial.album, None);
    }

    #[test]
    fn test_missing_tracks_page() {
        let response: SearchResponse = serde_json::from_value(json!({})).unwrap();
        assert!(normalize_search(response).is_empty());
    }
}
