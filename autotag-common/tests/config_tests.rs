//! Unit tests for configuration loading and graceful degradation
//!
//! Covers:
//! - Missing TOML files fall back to defaults without error
//! - Config path priority: CLI argument → AUTOTAG_CONFIG → platform default
//! - Atomic write-back preserves every field
//! - Credential resolution: ENV → TOML, blank values ignored
//!
//! Note: Tests that manipulate environment variables are marked #[serial]
//! so they never run in parallel.

use autotag_common::config::{
    env_override, load_or_default, load_toml_config, resolve_config_path, resolve_credential,
    write_toml_config, EngineSettings, LoggingConfig, TomlConfig, CONFIG_PATH_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_missing_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");

    let config = load_or_default(Some(&missing));

    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_malformed_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.toml");
    std::fs::write(&path, "this is = = not toml").unwrap();

    assert!(load_toml_config(&path).is_err());
    assert_eq!(load_or_default(Some(&path)), TomlConfig::default());
}

#[test]
fn test_partial_engine_section_parses() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("autotag.toml");
    std::fs::write(
        &path,
        r#"
discogs_token = "tok"

[logging]
level = "debug"

[engine]
high_threshold = 0.9
max_concurrent_workers = 2
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.engine.high_threshold, Some(0.9));
    assert_eq!(config.engine.max_concurrent_workers, Some(2));
    assert_eq!(config.engine.medium_threshold, None);
    assert_eq!(config.discogs_token.as_deref(), Some("tok"));
}

#[test]
fn test_write_then_load_preserves_fields() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("nested").join("autotag.toml");

    let config = TomlConfig {
        logging: LoggingConfig {
            level: "warn".to_string(),
            log_file: Some(PathBuf::from("/tmp/autotag.log")),
        },
        engine: EngineSettings {
            duration_tolerance_sec: Some(3.0),
            ..Default::default()
        },
        acoustid_api_key: Some("key123".to_string()),
        discogs_token: None,
        spotify_client_id: Some("id".to_string()),
        spotify_client_secret: Some("secret".to_string()),
    };

    write_toml_config(&config, &target).unwrap();

    assert!(target.exists());
    assert!(!target.with_file_name("autotag.toml.tmp").exists());
    assert_eq!(load_toml_config(&target).unwrap(), config);
}

#[cfg(unix)]
#[test]
fn test_written_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("autotag.toml");
    write_toml_config(&TomlConfig::default(), &target).unwrap();

    let mode = std::fs::metadata(&target).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
#[serial]
fn test_cli_path_beats_env() {
    env::set_var(CONFIG_PATH_ENV, "/tmp/from-env.toml");

    let resolved = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")));

    env::remove_var(CONFIG_PATH_ENV);
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-cli.toml")));
}

#[test]
#[serial]
fn test_env_path_used_without_cli() {
    env::set_var(CONFIG_PATH_ENV, "/tmp/from-env.toml");

    let resolved = resolve_config_path(None);

    env::remove_var(CONFIG_PATH_ENV);
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));
}

#[test]
#[serial]
fn test_credential_env_beats_toml_and_blank_is_ignored() {
    let toml_value = Some("from-toml".to_string());

    env::set_var("AUTOTAG_TEST_TOKEN", "from-env");
    assert_eq!(
        resolve_credential("AUTOTAG_TEST_TOKEN", toml_value.as_ref()).as_deref(),
        Some("from-env")
    );

    env::set_var("AUTOTAG_TEST_TOKEN", "   ");
    assert_eq!(
        resolve_credential("AUTOTAG_TEST_TOKEN", toml_value.as_ref()).as_deref(),
        Some("from-toml")
    );

    env::remove_var("AUTOTAG_TEST_TOKEN");
    assert_eq!(resolve_credential("AUTOTAG_TEST_TOKEN", None), None);
}

#[test]
#[serial]
fn test_env_override_ignores_garbage() {
    env::set_var("AUTOTAG_TEST_WORKERS", "eight");
    assert_eq!(env_override::<usize>("AUTOTAG_TEST_WORKERS"), None);

    env::set_var("AUTOTAG_TEST_WORKERS", " 8 ");
    assert_eq!(env_override::<usize>("AUTOTAG_TEST_WORKERS"), Some(8));

    env::remove_var("AUTOTAG_TEST_WORKERS");
}
