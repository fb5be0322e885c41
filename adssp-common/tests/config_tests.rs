//! Tests for config file discovery, graceful degradation and env overrides
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate ADSSP_CONFIG or ADSSP_TEST_* are marked with #[serial]
//! to ensure they run sequentially, not in parallel.

use adssp_common::config::{env_override, load_or_default, locate_config_file, TomlConfig, CONFIG_ENV_VAR};
use adssp_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn test_env_var_locates_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("from-env.toml");
    env::set_var(CONFIG_ENV_VAR, &path);

    assert_eq!(locate_config_file(None), Some(path));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_explicit_path_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/adssp-env.toml");

    let explicit = PathBuf::from("/tmp/adssp-cli.toml");
    assert_eq!(locate_config_file(Some(&explicit)), Some(explicit));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_config_file_does_not_error() {
    // Missing TOML file falls back to defaults
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("does-not-exist.toml");

    let config = load_or_default(Some(&missing)).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_malformed_config_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "[fusion\nstride = 200").unwrap();

    match load_or_default(Some(&path)) {
        Err(Error::Config(msg)) => assert!(msg.contains("broken.toml")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_config_file_values_loaded() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[logging]
level = "debug"

[dssp]
executable = "/opt/dssp/bin/mkdssp"
forbidden_codes = "HGI"

[pipeline]
workers = 6
"#,
    )
    .unwrap();

    let config = load_or_default(Some(&path)).unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.dssp.executable, Some(PathBuf::from("/opt/dssp/bin/mkdssp")));
    assert_eq!(config.dssp.forbidden_codes.as_deref(), Some("HGI"));
    assert_eq!(config.pipeline.workers, Some(6));
    assert_eq!(config.fusion.stride, None);
}

#[test]
#[serial]
fn test_env_override_parses_value() {
    env::set_var("ADSSP_TEST_STRIDE", " 250 ");
    let value: Option<usize> = env_override("ADSSP_TEST_STRIDE").unwrap();
    assert_eq!(value, Some(250));
    env::remove_var("ADSSP_TEST_STRIDE");
}

#[test]
#[serial]
fn test_env_override_unset_and_blank() {
    env::remove_var("ADSSP_TEST_UNSET");
    let value: Option<f64> = env_override("ADSSP_TEST_UNSET").unwrap();
    assert!(value.is_none());

    env::set_var("ADSSP_TEST_BLANK", "   ");
    let value: Option<f64> = env_override("ADSSP_TEST_BLANK").unwrap();
    assert!(value.is_none());
    env::remove_var("ADSSP_TEST_BLANK");
}

#[test]
#[serial]
fn test_env_override_invalid_value_names_variable() {
    env::set_var("ADSSP_TEST_BAD", "lots");
    let result: adssp_common::Result<Option<u32>> = env_override("ADSSP_TEST_BAD");

    match result {
        Err(Error::Config(msg)) => assert!(msg.contains("ADSSP_TEST_BAD")),
        other => panic!("expected config error, got {:?}", other),
    }
    env::remove_var("ADSSP_TEST_BAD");
}
