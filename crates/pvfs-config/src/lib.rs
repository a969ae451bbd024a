//! # pvfs-config
//!
//! Configuration management for the pvfs record store.
//!
//! Loads configuration from:
//! 1. `~/.pvfs/config.toml` (global)
//! 2. `.pvfs/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub flush: FlushConfig,
    pub errors: ErrorConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.pvfs/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Load project config (.pvfs/config.toml) - overrides global
        let project_path = Path::new(".pvfs/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::from_file(project_path)?;
            config.merge(project_config);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Parse a single config file without merging or env overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Config rooted at an explicit storage directory, everything else default.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        let mut config = Config::default();
        config.storage.root = root.as_ref().to_path_buf();
        config
    }

    /// Global config path: ~/.pvfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".pvfs/config.toml"))
    }

    /// Merge another config (project overrides).
    ///
    /// Only values that differ from the defaults are taken from `other`.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();
        if other.storage.root != defaults.storage.root {
            self.storage.root = other.storage.root;
        }
        if other.storage.max_init_attempts != defaults.storage.max_init_attempts {
            self.storage.max_init_attempts = other.storage.max_init_attempts;
        }
        if other.storage.allocation != defaults.storage.allocation {
            self.storage.allocation = other.storage.allocation;
        }
        if other.flush != defaults.flush {
            self.flush = other.flush;
        }
        if other.errors.restart_threshold != defaults.errors.restart_threshold {
            self.errors.restart_threshold = other.errors.restart_threshold;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var("PVFS_ROOT") {
            self.storage.root = PathBuf::from(path);
        }
        if let Ok(value) = std::env::var("PVFS_MAX_INIT_ATTEMPTS") {
            self.storage.max_init_attempts =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "PVFS_MAX_INIT_ATTEMPTS",
                    value,
                })?;
        }
        if let Ok(value) = std::env::var("PVFS_FLUSH_PERIOD_MS") {
            self.flush.period_ms = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PVFS_FLUSH_PERIOD_MS",
                value,
            })?;
        }
        if let Ok(value) = std::env::var("PVFS_FLUSH_STRATEGY") {
            self.flush.strategy = match value.as_str() {
                "periodic" => FlushStrategy::Periodic,
                "contention-aware" => FlushStrategy::ContentionAware,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "PVFS_FLUSH_STRATEGY",
                        value,
                    })
                }
            };
        }
        Ok(())
    }

    /// Storage root with a leading `~/` expanded.
    pub fn storage_root(&self) -> PathBuf {
        expand_home(&self.storage.root)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

/// How record ids are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationMode {
    /// Reuse slots freed in a previous session.
    #[default]
    Recycle,
    /// Never reuse slots; ids only grow.
    GrowOnly,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding records, contents, names and attributes
    pub root: PathBuf,
    /// Initialization attempts before the store is declared unusable
    pub max_init_attempts: u32,
    /// Record id allocation policy
    pub allocation: AllocationMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.pvfs/store"),
            max_init_attempts: 3,
            allocation: AllocationMode::Recycle,
        }
    }
}

/// Background flush policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushStrategy {
    /// Flush everything once the store has been quiet for a period.
    #[default]
    Periodic,
    /// Flush only as much as the current writer activity allows.
    ContentionAware,
}

/// Flush configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Run the background flusher at all
    pub enabled: bool,
    pub strategy: FlushStrategy,
    /// Tick period in milliseconds
    pub period_ms: u64,
    /// Writes per tick above which the contention-aware flusher defers
    pub contention_quota: u64,
}

impl FlushConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: FlushStrategy::Periodic,
            period_ms: 5_000,
            contention_quota: 1_000,
        }
    }
}

/// Error escalation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorConfig {
    /// Accumulated corruption count above which users are asked to restart
    pub restart_threshold: u32,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            restart_threshold: 5,
        }
    }
}
