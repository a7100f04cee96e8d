//! Metadata Fuser
//!
//! Merges the top candidate of each cascade stage into one
//! [`UnifiedTrackData`] using a per-field table rather than a single source
//! ranking:
//!
//! | field group | winner |
//! |---|---|
//! | title, artist, featured, remixer | highest composite (tie → source priority) |
//! | recording id | authority when present, else the identity candidate |
//! | label, catalog no., styles, album, year, cover art | editorial if it supplied the field and scored ≥ MEDIUM, else popularity, else authority |
//! | popularity | popularity only |
//! | ISRC | authority, else popularity |
//!
//! Losing values are dropped. Provenance records only the winner. The
//! aggregate confidence is the identity candidate's composite, never an
//! average.

use tracing::debug;

use crate::services::candidate_scorer::top_candidate;
use crate::services::filename_parser::{extract_remixer, split_featured, split_title_suffix};
use crate::types::{
    FieldOrigin, ScoredCandidate, SourceKind, TrackField, UnifiedTrackData,
};

/// Metadata Fuser
pub struct MetadataFuser {
    /// Editorial values count only at or above this composite
    medium_threshold: f64,
}

impl MetadataFuser {
    pub fn new(medium_threshold: f64) -> Self {
        Self {
            medium_threshold: medium_threshold.clamp(0.0, 1.0),
        }
    }

    /// Fuse the per-stage winners. `None` when nothing survived scoring.
    pub fn fuse(&self, stage_winners: &[ScoredCandidate]) -> Option<UnifiedTrackData> {
        // Stable input order so equal inputs always fuse identically
        let mut inputs: Vec<&ScoredCandidate> = stage_winners.iter().collect();
        inputs.sort_by_key(|c| c.source().priority());
        let owned: Vec<ScoredCandidate> = inputs.iter().map(|c| (*c).clone()).collect();

        let identity = top_candidate(&owned)?;
        let by_source = |kind: SourceKind| inputs.iter().copied().find(|c| c.source() == kind);
        let authority = by_source(SourceKind::Authority);
        let editorial = by_source(SourceKind::Editorial);
        let popularity = by_source(SourceKind::Popularity);

        let mut data = UnifiedTrackData {
            confidence: identity.composite_score,
            identity_source: Some(identity.source()),
            ..Default::default()
        };
        let identity_origin = FieldOrigin::Catalog(identity.source());

        // Identity fields
        let (main_artist, mut featured) = split_featured(&identity.candidate.artist);
        let (_, suffix) = split_title_suffix(&identity.candidate.title);
        if let Some((_, guest)) = suffix.split_once("feat. ").or_else(|| suffix.split_once("ft. ")) {
            let guest = guest.trim().to_string();
            if !guest.is_empty() && !featured.contains(&guest) {
                featured.push(guest);
            }
        }

        set_field(&mut data.title, Some(identity.candidate.title.clone()), TrackField::Title, identity_origin, &mut data.provenance);
        set_field(&mut data.artist, Some(main_artist), TrackField::Artist, identity_origin, &mut data.provenance);
        set_field(&mut data.remixer, extract_remixer(&suffix), TrackField::Remixer, identity_origin, &mut data.provenance);
        if !featured.is_empty() {
            data.featured_artists = featured;
            data.provenance.insert(TrackField::FeaturedArtists, identity_origin);
        }

        // Stable ids
        for input in &inputs {
            data.external_ids
                .insert(input.source(), input.candidate.external_id.clone());
        }
        let id_holder = authority.unwrap_or(identity);
        set_field(
            &mut data.recording_id,
            Some(id_holder.candidate.external_id.clone()),
            TrackField::RecordingId,
            FieldOrigin::Catalog(id_holder.source()),
            &mut data.provenance,
        );

        // Editorial group: trusted editorial, then popularity, then authority
        let trusted_editorial = editorial.filter(|e| e.composite_score >= self.medium_threshold);
        if editorial.is_some() && trusted_editorial.is_none() {
            debug!(
                threshold = self.medium_threshold,
                "Editorial candidate below MEDIUM; its descriptive fields are ignored"
            );
        }
        let editorial_order: Vec<&ScoredCandidate> = [trusted_editorial, popularity, authority]
            .into_iter()
            .flatten()
            .collect();

        macro_rules! pick_editorial {
            ($field:ident, $track_field:expr) => {
                if let Some(winner) = editorial_order
                    .iter()
                    .find(|c| c.candidate.editorial.$field.is_some())
                {
                    data.$field = winner.candidate.editorial.$field.clone();
                    data.provenance
                        .insert($track_field, FieldOrigin::Catalog(winner.source()));
                }
            };
        }

        pick_editorial!(label, TrackField::Label);
        pick_editorial!(catalog_number, TrackField::CatalogNumber);
        pick_editorial!(album, TrackField::Album);
        pick_editorial!(release_year, TrackField::ReleaseYear);
        pick_editorial!(cover_art_url, TrackField::CoverArt);

        if let Some(winner) = editorial_order
            .iter()
            .find(|c| !c.candidate.editorial.styles.is_empty())
        {
            data.styles = winner.candidate.editorial.styles.clone();
            data.provenance
                .insert(TrackField::Styles, FieldOrigin::Catalog(winner.source()));
        }

        // Consumption fields
        if let Some(pop) = popularity.and_then(|p| p.candidate.editorial.popularity) {
            data.popularity = Some(pop);
            data.provenance.insert(
                TrackField::Popularity,
                FieldOrigin::Catalog(SourceKind::Popularity),
            );
        }
        if let Some(winner) = [authority, popularity]
            .into_iter()
            .flatten()
            .find(|c| c.candidate.isrc.is_some())
        {
            data.isrc = winner.candidate.isrc.clone();
            data.provenance
                .insert(TrackField::Isrc, FieldOrigin::Catalog(winner.source()));
        }

        debug!(
            identity_source = %identity.source(),
            confidence = data.confidence,
            fields = data.provenance.len(),
            "Metadata fused"
        );

        Some(data)
    }
}

fn set_field(
    slot: &mut Option<String>,
    value: Option<String>,
    field: TrackField,
    origin: FieldOrigin,
    provenance: &mut std::collections::BTreeMap<TrackField, FieldOrigin>,
) {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        *slot = Some(v);
        provenance.insert(field, origin);
    }
}
