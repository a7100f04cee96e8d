//! Tag writer collaborator
//!
//! Only COMMITTED-bound tracks reach the writer, and only with the action
//! the decision policy authorized. Two implementations ship:
//! - [`DryRunTagWriter`]: logs what would be written, touches nothing
//! - [`FileTagWriter`]: writes the fused record into the file's primary tag
//!   with lofty, embeds cover art, then performs any authorized rename

use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::WriteError;
use crate::types::{ApprovedAction, ConfidenceTier, SourceKind, UnifiedTrackData};

const COVER_ART_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait TagWriter: Send + Sync {
    async fn write(
        &self,
        path: &Path,
        data: &UnifiedTrackData,
        tier: ConfidenceTier,
        action: &ApprovedAction,
    ) -> Result<(), WriteError>;
}

fn log_tags(path: &Path, data: &UnifiedTrackData, tier: ConfidenceTier, dry_run: bool) {
    tracing::info!(
        file = %path.display(),
        tier = ?tier,
        dry_run,
        title = data.title.as_deref().unwrap_or(""),
        artist = data.artist.as_deref().unwrap_or(""),
        album = data.album.as_deref().unwrap_or(""),
        label = data.label.as_deref().unwrap_or(""),
        isrc = data.isrc.as_deref().unwrap_or(""),
        confidence = data.confidence,
        "Writing tags"
    );
}

#[derive(Debug, Default)]
pub struct DryRunTagWriter;

#[async_trait]
impl TagWriter for DryRunTagWriter {
    async fn write(
        &self,
        path: &Path,
        data: &UnifiedTrackData,
        tier: ConfidenceTier,
        action: &ApprovedAction,
    ) -> Result<(), WriteError> {
        log_tags(path, data, tier, true);
        if let ApprovedAction::TagAndRename { file_name } = action {
            tracing::info!(file = %path.display(), new_name = %file_name, "Would rename");
        }
        Ok(())
    }
}

/// Downloaded front cover
#[derive(Debug, Clone)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime_type: Option<MimeType>,
}

/// Writes tags into the file itself
pub struct FileTagWriter {
    /// `None` disables cover art download
    client: Option<reqwest::Client>,
}

impl FileTagWriter {
    pub fn new() -> Result<Self, WriteError> {
        let client = reqwest::Client::builder()
            .user_agent(autotag_common::config::get_user_agent())
            .timeout(COVER_ART_TIMEOUT)
            .build()
            .map_err(|e| WriteError::Tags(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self { client: Some(client) })
    }

    /// Text tags only; cover art URLs are ignored
    pub fn without_cover_art() -> Self {
        Self { client: None }
    }

    /// Fetch the cover; any failure just means no embedded picture
    async fn fetch_cover(&self, url: &str) -> Option<CoverArt> {
        let client = self.client.as_ref()?;
        let response = match client.get(url).send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cover art download failed");
                return None;
            }
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            tracing::warn!(url = %url, content_type = %content_type, "Cover art response is not an image");
        }

        match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => Some(CoverArt {
                data: bytes.to_vec(),
                mime_type: mime_type_of(&content_type),
            }),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cover art download failed");
                None
            }
        }
    }

    /// Target path next to `path`; refuses to replace another file
    async fn rename_target(path: &Path, file_name: &str) -> Result<PathBuf, WriteError> {
        let target = path.with_file_name(file_name);
        if target == path {
            return Ok(target);
        }
        match tokio::fs::try_exists(&target).await {
            Ok(false) => Ok(target),
            Ok(true) => Err(WriteError::Rename(format!(
                "{} already exists",
                target.display()
            ))),
            Err(e) => Err(WriteError::Rename(e.to_string())),
        }
    }
}

#[async_trait]
impl TagWriter for FileTagWriter {
    async fn write(
        &self,
        path: &Path,
        data: &UnifiedTrackData,
        tier: ConfidenceTier,
        action: &ApprovedAction,
    ) -> Result<(), WriteError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(WriteError::Tags(format!("{} does not exist", path.display())));
        }
        log_tags(path, data, tier, false);

        let cover = match data.cover_art_url.as_deref() {
            Some(url) => self.fetch_cover(url).await,
            None => None,
        };

        // Rename only after the tags are safely on disk
        let tag_path = path.to_path_buf();
        let tag_data = data.clone();
        tokio::task::spawn_blocking(move || write_tags(&tag_path, &tag_data, cover))
            .await
            .map_err(|e| WriteError::Tags(format!("tag writer task failed: {}", e)))??;

        if let ApprovedAction::TagAndRename { file_name } = action {
            let target = Self::rename_target(path, file_name).await?;
            if target != path {
                tokio::fs::rename(path, &target)
                    .await
                    .map_err(|e| WriteError::Rename(format!("{}: {}", path.display(), e)))?;
                tracing::info!(from = %path.display(), to = %target.display(), "Renamed");
            }
        }
        Ok(())
    }
}

fn mime_type_of(content_type: &str) -> Option<MimeType> {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence {
        "image/jpeg" | "image/jpg" => Some(MimeType::Jpeg),
        "image/png" => Some(MimeType::Png),
        "image/gif" => Some(MimeType::Gif),
        "image/bmp" => Some(MimeType::Bmp),
        "image/tiff" => Some(MimeType::Tiff),
        _ => None,
    }
}

/// Artist with featured guests, as players display it
fn artist_credit(data: &UnifiedTrackData) -> Option<String> {
    let artist = data.artist.as_deref()?;
    if data.featured_artists.is_empty() {
        Some(artist.to_string())
    } else {
        Some(format!("{} feat. {}", artist, data.featured_artists.join(", ")))
    }
}

/// Blocking read-modify-write of the file's primary tag
pub fn write_tags(path: &Path, data: &UnifiedTrackData, cover: Option<CoverArt>) -> Result<(), WriteError> {
    let tag_error = |e: lofty::error::LoftyError| WriteError::Tags(format!("{}: {}", path.display(), e));

    // Default parse options keep existing pictures across the rewrite
    let mut tagged_file = Probe::open(path).map_err(tag_error)?.read().map_err(tag_error)?;

    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file.tag_mut(tag_type).ok_or_else(|| {
        WriteError::Tags(format!("{}: {:?} tags are not supported", path.display(), tag_type))
    })?;

    if let Some(title) = &data.title {
        tag.set_title(title.clone());
    }
    if let Some(artist) = artist_credit(data) {
        tag.set_artist(artist);
    }
    if let Some(album) = &data.album {
        tag.set_album(album.clone());
    }
    if !data.styles.is_empty() {
        tag.set_genre(data.styles.join(", "));
    }
    if let Some(year) = data.release_year.and_then(|y| u32::try_from(y).ok()) {
        tag.set_year(year);
    }

    let text_items = [
        (ItemKey::Label, data.label.as_ref()),
        (ItemKey::CatalogNumber, data.catalog_number.as_ref()),
        (ItemKey::Isrc, data.isrc.as_ref()),
        (ItemKey::Remixer, data.remixer.as_ref()),
        (
            ItemKey::MusicBrainzRecordingId,
            data.external_ids.get(&SourceKind::Authority),
        ),
    ];
    for (key, value) in text_items {
        if let Some(value) = value {
            if !tag.insert_text(key.clone(), value.clone()) {
                tracing::debug!(file = %path.display(), key = ?key, tag_type = ?tag_type, "Tag format has no slot for this item");
            }
        }
    }

    if let Some(cover) = cover {
        tag.remove_picture_type(PictureType::CoverFront);
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            cover.mime_type,
            None,
            cover.data,
        ));
    }

    tag.save_to_path(path, WriteOptions::default()).map_err(tag_error)?;
    tracing::debug!(file = %path.display(), tag_type = ?tag_type, "Tags saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metadata_extractor::fixtures::write_wav;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn data() -> UnifiedTrackData {
        UnifiedTrackData {
            title: Some("Strobe".into()),
            artist: Some("deadmau5".into()),
            album: Some("For Lack of a Better Name".into()),
            label: Some("mau5trap".into()),
            catalog_number: Some("MAU50018".into()),
            styles: vec!["Progressive House".into(), "Electro".into()],
            release_year: Some(2009),
            isrc: Some("USUS10900123".into()),
            external_ids: BTreeMap::from([(SourceKind::Authority, "mb-strobe".to_string())]),
            confidence: 0.97,
            ..Default::default()
        }
    }

    fn wav(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        write_wav(&path, 4_410);
        path
    }

    fn read_tag(path: &Path) -> Tag {
        let tagged_file = Probe::open(path).unwrap().read().unwrap();
        tagged_file.primary_tag().cloned().expect("primary tag written")
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track01.mp3");
        std::fs::write(&path, b"audio").unwrap();

        let action = ApprovedAction::TagAndRename {
            file_name: "Strobe - deadmau5.mp3".into(),
        };
        DryRunTagWriter
            .write(&path, &data(), ConfidenceTier::High, &action)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"audio");
        assert!(!dir.path().join("Strobe - deadmau5.mp3").exists());
    }

    #[test]
    fn test_fused_fields_are_written_to_the_file() {
        let dir = TempDir::new().unwrap();
        let path = wav(&dir, "track01.wav");

        write_tags(&path, &data(), None).unwrap();

        let tag = read_tag(&path);
        assert_eq!(tag.title().as_deref(), Some("Strobe"));
        assert_eq!(tag.artist().as_deref(), Some("deadmau5"));
        assert_eq!(tag.album().as_deref(), Some("For Lack of a Better Name"));
        assert_eq!(tag.genre().as_deref(), Some("Progressive House, Electro"));
        assert_eq!(tag.get_string(&ItemKey::Label), Some("mau5trap"));
        assert_eq!(tag.get_string(&ItemKey::Isrc), Some("USUS10900123"));
        assert_eq!(tag.get_string(&ItemKey::CatalogNumber), Some("MAU50018"));
    }

    #[test]
    fn test_cover_art_replaces_the_front_cover() {
        let dir = TempDir::new().unwrap();
        let path = wav(&dir, "track01.wav");
        let cover = |bytes: &[u8]| CoverArt {
            data: bytes.to_vec(),
            mime_type: Some(MimeType::Jpeg),
        };

        write_tags(&path, &data(), Some(cover(&[0xFF, 0xD8, 0xFF, 0x01]))).unwrap();
        write_tags(&path, &data(), Some(cover(&[0xFF, 0xD8, 0xFF, 0x02]))).unwrap();

        let tag = read_tag(&path);
        let fronts: Vec<&Picture> = tag
            .pictures()
            .iter()
            .filter(|p| p.pic_type() == PictureType::CoverFront)
            .collect();
        assert_eq!(fronts.len(), 1);
        assert_eq!(fronts[0].data(), &[0xFF, 0xD8, 0xFF, 0x02]);
    }

    #[test]
    fn test_featured_artists_join_the_artist_tag() {
        let mut data = data();
        data.featured_artists = vec!["Rob Swire".into()];
        assert_eq!(artist_credit(&data).as_deref(), Some("deadmau5 feat. Rob Swire"));
    }

    #[test]
    fn test_non_audio_file_is_a_tag_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("track01.mp3");
        std::fs::write(&path, b"audio").unwrap();

        let err = write_tags(&path, &data(), None).unwrap_err();
        assert!(matches!(err, WriteError::Tags(_)));
    }

    #[test]
    fn test_mime_type_from_content_type() {
        assert_eq!(mime_type_of("image/jpeg"), Some(MimeType::Jpeg));
        assert_eq!(mime_type_of("image/png; charset=binary"), Some(MimeType::Png));
        assert_eq!(mime_type_of("text/html"), None);
    }

    #[tokio::test]
    async fn test_rename_applied_after_tagging() {
        let dir = TempDir::new().unwrap();
        let path = wav(&dir, "track01.wav");

        let action = ApprovedAction::TagAndRename {
            file_name: "Strobe - deadmau5.wav".into(),
        };
        FileTagWriter::without_cover_art()
            .write(&path, &data(), ConfidenceTier::High, &action)
            .await
            .unwrap();

        let renamed = dir.path().join("Strobe - deadmau5.wav");
        assert!(!path.exists());
        assert_eq!(read_tag(&renamed).title().as_deref(), Some("Strobe"));
    }

    #[tokio::test]
    async fn test_rename_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = wav(&dir, "track01.wav");
        std::fs::write(dir.path().join("Strobe - deadmau5.wav"), b"other").unwrap();

        let action = ApprovedAction::TagAndRename {
            file_name: "Strobe - deadmau5.wav".into(),
        };
        let err = FileTagWriter::without_cover_art()
            .write(&path, &data(), ConfidenceTier::High, &action)
            .await
            .unwrap_err();

        assert!(matches!(err, WriteError::Rename(_)));
        assert!(path.exists());
        assert_eq!(std::fs::read(dir.path().join("Strobe - deadmau5.wav")).unwrap(), b"other");
    }

    #[tokio::test]
    async fn test_tag_only_keeps_name() {
        let dir = TempDir::new().unwrap();
        let path = wav(&dir, "track01.wav");

        FileTagWriter::without_cover_art()
            .write(&path, &data(), ConfidenceTier::Medium, &ApprovedAction::TagOnly)
            .await
            .unwrap();

        assert!(path.exists());
        assert_eq!(read_tag(&path).get_string(&ItemKey::Label), Some("mau5trap"));
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let err = FileTagWriter::without_cover_art()
            .write(
                Path::new("/nonexistent/autotag/track.mp3"),
                &data(),
                ConfidenceTier::Medium,
                &ApprovedAction::TagOnly,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Tags(_)));
    }
}
