//! Plausibility check of a fused identity against the file's own text
//!
//! Token overlap between the local name/tags and the chosen "artist title",
//! plus markers for download rips and mashups/bootlegs. The report rides on
//! the record for review; it never changes the tier.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::types::{SanityReport, TrackIdentity, UnifiedTrackData};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").unwrap());

const RIP_MARKERS: &[&str] = &[
    "y2mate",
    "youtube",
    "youtu.be",
    "web-rip",
    "webrip",
    "soundcloud",
    "mixcloud",
    "rip ",
    " rip-",
    "rip]",
    "[free download]",
    " free download",
    " [free]",
];

const MASHUP_MARKERS: &[&str] = &[
    "mashup",
    "bootleg",
    "rework",
    "re-edit",
    "re edit",
    "private edit",
    "extended edit",
    "unofficial",
    " vs ",
    "vs.",
    " edit by ",
];

fn words(text: &str) -> BTreeSet<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn jaccard(a: &str, b: &str) -> f64 {
    let (wa, wb) = (words(a), words(b));
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let shared = wa.intersection(&wb).count();
    shared as f64 / wa.union(&wb).count() as f64
}

/// Compare the fused artist/title with the file name and local title/artist
pub fn analyze(identity: &TrackIdentity, data: &UnifiedTrackData) -> SanityReport {
    let file_name = identity
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = identity
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().replace('_', " "))
        .unwrap_or_default();
    let local_title = identity.parsed.title.as_str();
    let local_artist = identity.parsed.artist.as_deref().unwrap_or("");

    let artist = data.artist.as_deref().unwrap_or("");
    let title = data.title.as_deref().unwrap_or("");
    let combined = format!("{} {}", artist, title);

    let artist_similarity = jaccard(&stem, artist).max(jaccard(local_artist, artist));
    let title_similarity = jaccard(&stem, title).max(jaccard(local_title, title));
    let sanity_score = jaccard(&stem, &combined)
        .max(jaccard(&format!("{} {}", local_artist, local_title), &combined))
        .max((artist_similarity + title_similarity) / 2.0);

    let local_text = format!("{} {} {}", file_name, local_title, local_artist).to_lowercase();
    SanityReport {
        sanity_score,
        artist_similarity,
        title_similarity,
        is_rip: RIP_MARKERS.iter().any(|m| local_text.contains(m)),
        is_mashup_or_edit: MASHUP_MARKERS.iter().any(|m| local_text.contains(m)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fused(title: &str, artist: &str) -> UnifiedTrackData {
        UnifiedTrackData {
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_matching_name_scores_full_overlap() {
        let identity = TrackIdentity::from_path("/music/Daft Punk - One More Time.mp3", None);
        let report = analyze(&identity, &fused("One More Time", "Daft Punk"));

        assert!((report.sanity_score - 1.0).abs() < 1e-9);
        assert!((report.artist_similarity - 1.0).abs() < 1e-9);
        assert!(report.flags().is_empty());
    }

    #[test]
    fn test_mashup_name_is_flagged() {
        let identity = TrackIdentity::from_path("/music/Billie Jean Vs. Last Night.mp3", None);
        let report = analyze(&identity, &fused("Last Night a D.J. Saved My Life", "Indeep"));

        assert!(report.is_mashup_or_edit);
        assert!(!report.is_rip);
        assert_eq!(report.artist_similarity, 0.0);
        assert!(report.sanity_score < 0.5, "{}", report.sanity_score);
    }

    #[test]
    fn test_download_rip_is_flagged() {
        let identity = TrackIdentity::from_path("/music/Modjo - Lady (y2mate.com).mp3", None);
        let report = analyze(&identity, &fused("Lady (Hear Me Tonight)", "Modjo"));

        assert_eq!(report.flags(), vec!["rip"]);
        assert!((report.artist_similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_fused_text_scores_zero() {
        let identity = TrackIdentity::from_path("/music/track01.mp3", None);
        let report = analyze(&identity, &UnifiedTrackData::default());

        assert_eq!(report.sanity_score, 0.0);
    }
}
