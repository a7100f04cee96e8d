//! Local metadata reader
//!
//! Reads embedded title/artist and the audio duration with lofty, so the
//! pipeline starts from what the file says about itself. Files lofty cannot
//! parse fall back to the file name alone.

use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::MetadataError;
use crate::types::TrackIdentity;

/// What the file's own tags and properties say
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Zero-length streams report `None`
    pub duration_seconds: Option<f64>,
}

/// Blocking read of one file's tags and duration
pub fn read_local_metadata(path: &Path) -> Result<LocalMetadata, MetadataError> {
    let tagged_file = Probe::open(path)
        .map_err(|e| MetadataError::Read(format!("{}: {}", path.display(), e)))?
        .read()
        .map_err(|e| MetadataError::Read(format!("{}: {}", path.display(), e)))?;

    let duration_seconds = Some(tagged_file.properties().duration().as_secs_f64()).filter(|d| *d > 0.0);

    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
    let (title, artist) = match tag {
        Some(tag) => (
            tag.title().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            tag.artist().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        ),
        None => (None, None),
    };

    debug!(
        file = %path.display(),
        title = ?title,
        artist = ?artist,
        duration_s = ?duration_seconds,
        "Read local metadata"
    );

    Ok(LocalMetadata {
        title,
        artist,
        duration_seconds,
    })
}

/// Pipeline input for `path`: embedded tags and duration where readable,
/// else the file name alone
pub async fn local_identity(path: PathBuf) -> TrackIdentity {
    let probe_path = path.clone();
    let metadata = tokio::task::spawn_blocking(move || read_local_metadata(&probe_path))
        .await
        .unwrap_or_else(|e| Err(MetadataError::Task(e.to_string())));

    match metadata {
        Ok(meta) => TrackIdentity::from_path(path, meta.duration_seconds)
            .with_local_tags(meta.title.as_deref(), meta.artist.as_deref()),
        Err(e @ MetadataError::Task(_)) => {
            warn!(file = %path.display(), error = %e, "Using the file name only");
            TrackIdentity::from_path(path, None)
        }
        Err(e) => {
            debug!(file = %path.display(), error = %e, "No readable local metadata; using the file name");
            TrackIdentity::from_path(path, None)
        }
    }
}
