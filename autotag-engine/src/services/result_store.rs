//! Result store collaborator
//!
//! Receives each track's record at DECIDED and again at its terminal state,
//! and carries manual confirmations for MEDIUM-tier tracks back to the
//! orchestrator. [`InMemoryResultStore`] is the default implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{EngineError, Result};
use crate::types::{Confirmation, TrackRecord};

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or replace the record for `record.identity.path`
    async fn publish(&self, record: TrackRecord) -> Result<()>;

    async fn get_by_path(&self, path: &Path) -> Option<TrackRecord>;

    async fn get_by_fingerprint(&self, fingerprint_hash: &str) -> Option<TrackRecord>;

    /// Queue a manual verdict; the track must have been published
    async fn submit_confirmation(&self, path: &Path, confirmation: Confirmation) -> Result<()>;

    /// Take every queued verdict, oldest first
    async fn drain_confirmations(&self) -> Vec<(PathBuf, Confirmation)>;
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<PathBuf, TrackRecord>,
    by_fingerprint: HashMap<String, PathBuf>,
    confirmations: Vec<(PathBuf, Confirmation)>,
}

#[derive(Default)]
pub struct InMemoryResultStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, ordered by path
    pub async fn records(&self) -> Vec<TrackRecord> {
        let inner = self.inner.lock().await;
        let mut records: Vec<TrackRecord> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| a.identity.path.cmp(&b.identity.path));
        records
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn publish(&self, record: TrackRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let path = record.identity.path.clone();
        if let Some(fp) = &record.fingerprint {
            inner
                .by_fingerprint
                .insert(fp.fingerprint_hash.clone(), path.clone());
        }
        tracing::debug!(file = %path.display(), state = %record.state, "Record published");
        inner.records.insert(path, record);
        Ok(())
    }

    async fn get_by_path(&self, path: &Path) -> Option<TrackRecord> {
        self.inner.lock().await.records.get(path).cloned()
    }

    async fn get_by_fingerprint(&self, fingerprint_hash: &str) -> Option<TrackRecord> {
        let inner = self.inner.lock().await;
        let path = inner.by_fingerprint.get(fingerprint_hash)?;
        inner.records.get(path).cloned()
    }

    async fn submit_confirmation(&self, path: &Path, confirmation: Confirmation) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.records.contains_key(path) {
            return Err(EngineError::UnknownTrack(path.display().to_string()));
        }
        inner.confirmations.push((path.to_path_buf(), confirmation));
        Ok(())
    }

    async fn drain_confirmations(&self) -> Vec<(PathBuf, Confirmation)> {
        std::mem::take(&mut self.inner.lock().await.confirmations)
    }
}
