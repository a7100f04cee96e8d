//! Engine configuration resolution
//!
//! Each setting resolves ENV → TOML `[engine]` → compiled default, then the
//! whole set is validated once. Catalog credentials resolve ENV → TOML.

use autotag_common::config::{env_override, resolve_credential, EngineSettings, TomlConfig};
use autotag_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Composite score weights (text, duration proximity, source authority)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub text: f64,
    pub duration: f64,
    pub authority: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            text: 0.40,
            duration: 0.15,
            authority: 0.45,
        }
    }
}

/// Fully resolved engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Composite score at or above which a track is HIGH
    pub high_threshold: f64,
    /// Composite score at or above which a track is MEDIUM
    pub medium_threshold: f64,
    /// Maximum |local − candidate| duration, seconds
    pub duration_tolerance_sec: f64,
    /// Tracks processed in parallel
    pub max_concurrent_workers: usize,
    /// Calls allowed per source per `rate_limit_interval_seconds`
    pub per_source_rate_limit: u32,
    pub rate_limit_interval_seconds: f64,
    /// In-flight calls allowed per source
    pub per_source_concurrency: usize,
    /// Total attempts for a TRANSIENT source error
    pub max_retries: u32,
    /// RATE_LIMITED waits tolerated per call, counted apart from `max_retries`
    pub max_rate_limit_waits: u32,
    pub backoff_base_seconds: f64,
    pub backoff_max_seconds: f64,
    /// Consecutive failed calls after which a source is skipped for the batch
    pub source_failure_budget: u32,
    pub weights: ScoreWeights,
    /// Minimum AcoustID result score kept by the authority adapter
    pub acoustid_min_score: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.95,
            medium_threshold: 0.50,
            duration_tolerance_sec: 5.0,
            max_concurrent_workers: 4,
            per_source_rate_limit: 1,
            rate_limit_interval_seconds: 1.0,
            per_source_concurrency: 2,
            max_retries: 3,
            max_rate_limit_waits: 5,
            backoff_base_seconds: 1.0,
            backoff_max_seconds: 30.0,
            source_failure_budget: 10,
            weights: ScoreWeights::default(),
            acoustid_min_score: 0.5,
        }
    }
}

/// Pick ENV, then TOML, then the default
fn tier<T: std::str::FromStr>(env_name: &str, toml_value: Option<T>, default: T) -> T {
    env_override(env_name).or(toml_value).unwrap_or(default)
}

impl EngineConfig {
    /// Resolve every setting from ENV and the TOML `[engine]` table
    pub fn resolve(toml_config: &TomlConfig) -> Result<Self> {
        let d = EngineConfig::default();
        let t: &EngineSettings = &toml_config.engine;

        let config = Self {
            high_threshold: tier("AUTOTAG_HIGH_THRESHOLD", t.high_threshold, d.high_threshold),
            medium_threshold: tier("AUTOTAG_MEDIUM_THRESHOLD", t.medium_threshold, d.medium_threshold),
            duration_tolerance_sec: tier(
                "AUTOTAG_DURATION_TOLERANCE_SEC",
                t.duration_tolerance_sec,
                d.duration_tolerance_sec,
            ),
            max_concurrent_workers: tier(
                "AUTOTAG_MAX_CONCURRENT_WORKERS",
                t.max_concurrent_workers,
                d.max_concurrent_workers,
            ),
            per_source_rate_limit: tier(
                "AUTOTAG_PER_SOURCE_RATE_LIMIT",
                t.per_source_rate_limit,
                d.per_source_rate_limit,
            ),
            rate_limit_interval_seconds: tier(
                "AUTOTAG_RATE_LIMIT_INTERVAL_SECONDS",
                t.rate_limit_interval_seconds,
                d.rate_limit_interval_seconds,
            ),
            per_source_concurrency: tier(
                "AUTOTAG_PER_SOURCE_CONCURRENCY",
                t.per_source_concurrency,
                d.per_source_concurrency,
            ),
            max_retries: tier("AUTOTAG_MAX_RETRIES", t.max_retries, d.max_retries),
            max_rate_limit_waits: tier(
                "AUTOTAG_MAX_RATE_LIMIT_WAITS",
                t.max_rate_limit_waits,
                d.max_rate_limit_waits,
            ),
            backoff_base_seconds: tier(
                "AUTOTAG_BACKOFF_BASE_SECONDS",
                t.backoff_base_seconds,
                d.backoff_base_seconds,
            ),
            backoff_max_seconds: tier(
                "AUTOTAG_BACKOFF_MAX_SECONDS",
                t.backoff_max_seconds,
                d.backoff_max_seconds,
            ),
            source_failure_budget: tier(
                "AUTOTAG_SOURCE_FAILURE_BUDGET",
                t.source_failure_budget,
                d.source_failure_budget,
            ),
            weights: ScoreWeights {
                text: tier("AUTOTAG_WEIGHT_TEXT", t.weight_text, d.weights.text),
                duration: tier("AUTOTAG_WEIGHT_DURATION", t.weight_duration, d.weights.duration),
                authority: tier("AUTOTAG_WEIGHT_AUTHORITY", t.weight_authority, d.weights.authority),
            },
            acoustid_min_score: tier(
                "AUTOTAG_ACOUSTID_MIN_SCORE",
                t.acoustid_min_score,
                d.acoustid_min_score,
            ),
        };

        config.validate()?;
        info!(
            high = config.high_threshold,
            medium = config.medium_threshold,
            tolerance_sec = config.duration_tolerance_sec,
            workers = config.max_concurrent_workers,
            max_retries = config.max_retries,
            "Engine configuration resolved"
        );
        Ok(config)
    }

    /// Fully populated `[engine]` table, for writing a starter config file
    pub fn to_settings(&self) -> EngineSettings {
        EngineSettings {
            high_threshold: Some(self.high_threshold),
            medium_threshold: Some(self.medium_threshold),
            duration_tolerance_sec: Some(self.duration_tolerance_sec),
            max_concurrent_workers: Some(self.max_concurrent_workers),
            per_source_rate_limit: Some(self.per_source_rate_limit),
            rate_limit_interval_seconds: Some(self.rate_limit_interval_seconds),
            per_source_concurrency: Some(self.per_source_concurrency),
            max_retries: Some(self.max_retries),
            max_rate_limit_waits: Some(self.max_rate_limit_waits),
            backoff_base_seconds: Some(self.backoff_base_seconds),
            backoff_max_seconds: Some(self.backoff_max_seconds),
            source_failure_budget: Some(self.source_failure_budget),
            weight_text: Some(self.weights.text),
            weight_duration: Some(self.weights.duration),
            weight_authority: Some(self.weights.authority),
            acoustid_min_score: Some(self.acoustid_min_score),
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::Config(format!("{} must be within [0, 1], got {}", name, v)))
            }
        };

        unit("high_threshold", self.high_threshold)?;
        unit("medium_threshold", self.medium_threshold)?;
        unit("acoustid_min_score", self.acoustid_min_score)?;

        if self.medium_threshold > self.high_threshold {
            return Err(Error::Config(format!(
                "medium_threshold ({}) must not exceed high_threshold ({})",
                self.medium_threshold, self.high_threshold
            )));
        }
        if self.duration_tolerance_sec <= 0.0 {
            return Err(Error::Config("duration_tolerance_sec must be positive".to_string()));
        }
        if self.max_concurrent_workers == 0 || self.per_source_concurrency == 0 {
            return Err(Error::Config("worker and per-source concurrency must be at least 1".to_string()));
        }
        if self.per_source_rate_limit == 0 || self.rate_limit_interval_seconds <= 0.0 {
            return Err(Error::Config("per-source rate limit must allow at least one call".to_string()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries counts attempts and must be at least 1".to_string()));
        }
        if self.backoff_base_seconds < 0.0 || self.backoff_max_seconds < self.backoff_base_seconds {
            return Err(Error::Config(
                "backoff_base_seconds must be >= 0 and <= backoff_max_seconds".to_string(),
            ));
        }

        let w = self.weights;
        if w.text < 0.0 || w.duration < 0.0 || w.authority < 0.0 {
            return Err(Error::Config("score weights must be non-negative".to_string()));
        }
        if w.text + w.duration + w.authority <= 0.0 {
            return Err(Error::Config("score weights must not all be zero".to_string()));
        }
        Ok(())
    }
}

/// Catalog credentials
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub acoustid_api_key: Option<String>,
    pub discogs_token: Option<String>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
}

impl Credentials {
    pub fn resolve(toml_config: &TomlConfig) -> Self {
        Self {
            acoustid_api_key: resolve_credential(
                "AUTOTAG_ACOUSTID_API_KEY",
                toml_config.acoustid_api_key.as_ref(),
            ),
            discogs_token: resolve_credential("AUTOTAG_DISCOGS_TOKEN", toml_config.discogs_token.as_ref()),
            spotify_client_id: resolve_credential(
                "AUTOTAG_SPOTIFY_CLIENT_ID",
                toml_config.spotify_client_id.as_ref(),
            ),
            spotify_client_secret: resolve_credential(
                "AUTOTAG_SPOTIFY_CLIENT_SECRET",
                toml_config.spotify_client_secret.as_ref(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.high_threshold, 0.95);
        assert_eq!(config.medium_threshold, 0.50);
        assert_eq!(config.duration_tolerance_sec, 5.0);
        assert_eq!(config.max_concurrent_workers, 4);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let config = EngineConfig {
            high_threshold: 0.4,
            medium_threshold: 0.6,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_round_trip_through_toml_table() {
        let config = EngineConfig {
            high_threshold: 0.9,
            max_retries: 5,
            ..Default::default()
        };
        let toml_config = TomlConfig {
            engine: config.to_settings(),
            ..Default::default()
        };
        // No env overrides are set for these names in unit tests
        let resolved = EngineConfig::resolve(&toml_config).unwrap();
        assert_eq!(resolved.high_threshold, 0.9);
        assert_eq!(resolved.max_retries, 5);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = EngineConfig {
            max_concurrent_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
