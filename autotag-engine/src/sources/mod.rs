//! Catalog adapters
//!
//! One adapter per [`SourceKind`]. An adapter turns an [`IdentityHint`] into
//! zero or more [`CandidateMatch`]es; its normalization function is the only
//! place a catalog's response shape is known.

pub mod discogs_client;
pub mod http;
pub mod musicbrainz_client;
pub mod spotify_client;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{CandidateMatch, IdentityHint, SourceKind};

pub use discogs_client::DiscogsClient;
pub use musicbrainz_client::MusicBrainzClient;
pub use spotify_client::SpotifyClient;

/// Query seam to an external catalog
///
/// An empty result is `Ok(vec![])`, never an error.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn query(&self, hint: &IdentityHint) -> Result<Vec<CandidateMatch>, SourceError>;
}
