//! Integration tests for pvfs-config
//!
//! These tests verify config parsing with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;

use pvfs_config::{AllocationMode, Config, FlushStrategy};

/// Test config loading from a real config file
#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let pvfs_dir = temp.path().join(".pvfs");
    std::fs::create_dir_all(&pvfs_dir).unwrap();

    let config_content = r#"
[storage]
root = "/custom/store"
max_init_attempts = 5
allocation = "grow-only"

[flush]
enabled = false
strategy = "contention-aware"
period_ms = 250
contention_quota = 10

[errors]
restart_threshold = 9
"#;
    let path = pvfs_dir.join("config.toml");
    std::fs::write(&path, config_content).unwrap();

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.storage.root, PathBuf::from("/custom/store"));
    assert_eq!(config.storage.max_init_attempts, 5);
    assert_eq!(config.storage.allocation, AllocationMode::GrowOnly);
    assert!(!config.flush.enabled);
    assert_eq!(config.flush.strategy, FlushStrategy::ContentionAware);
    assert_eq!(config.flush.period().as_millis(), 250);
    assert_eq!(config.flush.contention_quota, 10);
    assert_eq!(config.errors.restart_threshold, 9);
}

/// Unknown strategy names are rejected instead of silently defaulted
#[test]
fn test_invalid_strategy_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[flush]\nstrategy = \"sometimes\"\n").unwrap();

    assert!(Config::from_file(&path).is_err());
}

/// An empty file yields the defaults
#[test]
fn test_empty_file_is_default() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "").unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.storage.max_init_attempts, 3);
    assert_eq!(config.errors.restart_threshold, 5);
    assert!(config.flush.enabled);
}

#[test]
fn test_with_root_points_storage_at_directory() {
    let temp = tempdir().unwrap();
    let config = Config::with_root(temp.path());
    assert_eq!(config.storage_root(), temp.path());
}
