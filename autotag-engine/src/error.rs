//! Error types for the engine
//!
//! Each collaborator seam has its own classified error; none of them cross
//! the seam as a panic. [`EngineError`] is reserved for batch-level faults.

use std::time::Duration;
use thiserror::Error;

use crate::types::SourceKind;

/// Engine-level result type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Batch-level errors surfaced to the caller
#[derive(Debug, Error)]
pub enum EngineError {
    /// Fingerprinting collaborator unreachable at startup (batch-fatal)
    #[error("Fingerprint service unavailable: {0}")]
    FingerprintServiceUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] autotag_common::Error),

    /// No track exists at this path in the current batch
    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    /// Track is not in a state that accepts the request
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a catalog failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// Network failure or 5xx; retried with backoff
    Transient,
    /// No match / bad request; never retried
    Permanent,
    /// Throttled by the catalog; waits are budgeted apart from retries
    RateLimited { retry_after: Option<Duration> },
}

/// Classified failure from a single catalog call
#[derive(Debug, Clone, Error)]
#[error("{source_kind} {kind:?}: {message}")]
pub struct SourceError {
    pub source_kind: SourceKind,
    pub kind: SourceErrorKind,
    pub message: String,
    /// HTTP status, when the catalog answered with one
    pub status: Option<u16>,
}

impl SourceError {
    pub fn transient(source_kind: SourceKind, message: impl Into<String>) -> Self {
        Self {
            source_kind,
            kind: SourceErrorKind::Transient,
            message: message.into(),
            status: None,
        }
    }

    pub fn permanent(source_kind: SourceKind, message: impl Into<String>) -> Self {
        Self {
            source_kind,
            kind: SourceErrorKind::Permanent,
            message: message.into(),
            status: None,
        }
    }

    pub fn rate_limited(source_kind: SourceKind, retry_after: Option<Duration>) -> Self {
        Self {
            source_kind,
            kind: SourceErrorKind::RateLimited { retry_after },
            message: "rate limited".to_string(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind == SourceErrorKind::Transient
    }
}

/// Malformed catalog response
#[derive(Debug, Clone, Error)]
#[error("{source_kind} returned a malformed response: {reason}")]
pub struct ValidationError {
    pub source_kind: SourceKind,
    pub reason: String,
}

impl ValidationError {
    pub fn new(source_kind: SourceKind, reason: impl Into<String>) -> Self {
        Self {
            source_kind,
            reason: reason.into(),
        }
    }
}

/// A malformed response is PERMANENT for that call
impl From<ValidationError> for SourceError {
    fn from(err: ValidationError) -> Self {
        SourceError::permanent(err.source_kind, err.to_string())
    }
}

/// Fingerprinting collaborator errors
#[derive(Debug, Clone, Error)]
pub enum FingerprintError {
    /// Service cannot be reached at all
    #[error("Fingerprint service unreachable: {0}")]
    Unreachable(String),

    /// Audio could not be fingerprinted
    #[error("Fingerprinting failed: {0}")]
    Failed(String),

    #[error("Fingerprinting timed out after {0:?}")]
    Timeout(Duration),
}

/// Local tag / audio property read errors
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    #[error("Failed to read file: {0}")]
    Read(String),

    #[error("Metadata reader task failed: {0}")]
    Task(String),
}

/// Tag writer errors
#[derive(Debug, Clone, Error)]
pub enum WriteError {
    #[error("Tag write failed: {0}")]
    Tags(String),

    #[error("Rename failed: {0}")]
    Rename(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_becomes_permanent() {
        let err: SourceError = ValidationError::new(SourceKind::Editorial, "missing id").into();
        assert_eq!(err.kind, SourceErrorKind::Permanent);
        assert_eq!(err.source_kind, SourceKind::Editorial);
        assert!(err.message.contains("missing id"));
    }

    #[test]
    fn test_source_error_display_names_source() {
        let err = SourceError::transient(SourceKind::Authority, "HTTP 502");
        assert!(err.to_string().starts_with("authority"));
        assert!(err.is_transient());
    }
}
