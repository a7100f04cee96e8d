//! Configuration loading, ENV overrides and TOML write-back
//!
//! Every setting resolves in this priority order:
//! 1. Environment variable (`AUTOTAG_*`)
//! 2. TOML config file
//! 3. Compiled default
//!
//! The config file itself is located by: command-line argument, then
//! `AUTOTAG_CONFIG`, then `<config_dir>/autotag/autotag.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "AUTOTAG_CONFIG";

/// Logging section of the TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default tracing level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file (stdout when absent)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
        }
    }
}

/// `[engine]` section. Every field is optional; the engine crate fills gaps
/// from ENV and compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    pub high_threshold: Option<f64>,
    pub medium_threshold: Option<f64>,
    pub duration_tolerance_sec: Option<f64>,
    pub max_concurrent_workers: Option<usize>,
    pub per_source_rate_limit: Option<u32>,
    pub rate_limit_interval_seconds: Option<f64>,
    pub per_source_concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub max_rate_limit_waits: Option<u32>,
    pub backoff_base_seconds: Option<f64>,
    pub backoff_max_seconds: Option<f64>,
    pub source_failure_budget: Option<u32>,
    pub weight_text: Option<f64>,
    pub weight_duration: Option<f64>,
    pub weight_authority: Option<f64>,
    pub acoustid_min_score: Option<f64>,
}

/// Parsed autotag TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// AcoustID application key (fingerprint lookups)
    #[serde(default)]
    pub acoustid_api_key: Option<String>,
    /// Discogs personal access token
    #[serde(default)]
    pub discogs_token: Option<String>,
    #[serde(default)]
    pub spotify_client_id: Option<String>,
    #[serde(default)]
    pub spotify_client_secret: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Default config file location for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("autotag").join("autotag.toml"))
}

/// Locate the config file: CLI argument, then `AUTOTAG_CONFIG`, then the platform default
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path()
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)?;
    debug!(path = %path.display(), "Loaded TOML config");
    Ok(config)
}

/// Load the config file, falling back to defaults.
///
/// A missing or unreadable file never stops startup: a warning is logged
/// and compiled defaults are used.
pub fn load_or_default(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        warn!("No config directory available, using compiled defaults");
        return TomlConfig::default();
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using compiled defaults");
        return TomlConfig::default();
    }

    match load_toml_config(path) {
        Ok(config) => {
            info!(path = %path.display(), "Configuration loaded");
            config
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Config file unreadable, using compiled defaults");
            TomlConfig::default()
        }
    }
}

/// Write config atomically (temp file + rename).
///
/// On Unix the file is restricted to 0600 since it may hold API credentials.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", path.display())))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), "Wrote TOML config");
    Ok(())
}

/// Read `name` from the environment and parse it.
///
/// Unparseable values are ignored with a warning so that a typo falls back
/// to the TOML/default tier instead of aborting.
pub fn env_override<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Resolve a credential: ENV first, then TOML. Blank values count as absent.
pub fn resolve_credential(env_name: &str, toml_value: Option<&String>) -> Option<String> {
    if let Ok(key) = std::env::var(env_name) {
        if is_valid_key(&key) {
            debug!(variable = env_name, "Credential loaded from environment variable");
            return Some(key.trim().to_string());
        }
    }

    toml_value
        .filter(|key| is_valid_key(key))
        .map(|key| key.trim().to_string())
}

fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// User-Agent used for every outbound catalog request
pub fn get_user_agent() -> String {
    format!(
        "autotag/{} ( https://github.com/autotag/autotag )",
        env!("CARGO_PKG_VERSION")
    )
}
