//! Audio fingerprinting collaborator
//!
//! [`FingerprintService`] is the seam the pipeline calls; [`FpcalcFingerprinter`]
//! is the default implementation, running Chromaprint's `fpcalc` tool and
//! reading its JSON output (the same fingerprint format AcoustID expects).

use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::FingerprintError;
use crate::types::FingerprintResult;

const DEFAULT_FPCALC: &str = "fpcalc";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Seconds of audio analysed (AcoustID recommends 120)
const DEFAULT_ANALYSIS_SECONDS: u32 = 120;

#[async_trait]
pub trait FingerprintService: Send + Sync {
    /// Checked once before a batch starts; failure is batch-fatal
    async fn health_check(&self) -> Result<(), FingerprintError>;

    async fn identify(&self, path: &Path) -> Result<FingerprintResult, FingerprintError>;
}

#[derive(Debug, Deserialize)]
struct FpcalcOutput {
    duration: f64,
    fingerprint: String,
}

pub struct FpcalcFingerprinter {
    binary: PathBuf,
    timeout: Duration,
    analysis_seconds: u32,
}

impl FpcalcFingerprinter {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_FPCALC),
            timeout: DEFAULT_TIMEOUT,
            analysis_seconds: DEFAULT_ANALYSIS_SECONDS,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[&OsStr]) -> Result<std::process::Output, FingerprintError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| FingerprintError::Timeout(self.timeout))?;

        output.map_err(|e| {
            FingerprintError::Unreachable(format!("cannot run {}: {}", self.binary.display(), e))
        })
    }
}

impl Default for FpcalcFingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FingerprintService for FpcalcFingerprinter {
    async fn health_check(&self) -> Result<(), FingerprintError> {
        let output = self.run(&[OsStr::new("-version")]).await?;
        if !output.status.success() {
            return Err(FingerprintError::Unreachable(format!(
                "{} -version exited with {}",
                self.binary.display(),
                output.status
            )));
        }
        tracing::debug!(
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "fpcalc available"
        );
        Ok(())
    }

    async fn identify(&self, path: &Path) -> Result<FingerprintResult, FingerprintError> {
        let length = self.analysis_seconds.to_string();
        let output = self
            .run(&[
                OsStr::new("-json"),
                OsStr::new("-length"),
                OsStr::new(&length),
                path.as_os_str(),
            ])
            .await?;

        if !output.status.success() {
            return Err(FingerprintError::Failed(format!(
                "{}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_fpcalc_output(&output.stdout)
    }
}

fn parse_fpcalc_output(stdout: &[u8]) -> Result<FingerprintResult, FingerprintError> {
    let parsed: FpcalcOutput = serde_json::from_slice(stdout)
        .map_err(|e| FingerprintError::Failed(format!("unreadable fpcalc output: {}", e)))?;

    if parsed.fingerprint.trim().is_empty() {
        return Err(FingerprintError::Failed("empty fingerprint".to_string()));
    }
    if !parsed.duration.is_finite() || parsed.duration <= 0.0 {
        return Err(FingerprintError::Failed(format!(
            "invalid measured duration {}",
            parsed.duration
        )));
    }

    Ok(FingerprintResult {
        fingerprint_hash: parsed.fingerprint,
        measured_duration_seconds: parsed.duration,
    })
}
