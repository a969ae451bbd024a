//! Throwaway store roots for tests.
//!
//! ```ignore
//! use pvfs_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let records = FsRecords::open(&env.config)?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use crate::Config;

/// A store root under a temp dir, removed on drop.
///
/// The config has the background flusher off so tests decide when data
/// reaches disk.
pub struct TestEnvironment {
    _temp_dir: TempDir,
    pub store_root: PathBuf,
    pub config: Config,
}

impl TestEnvironment {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let store_root = temp_dir.path().join("store");
        std::fs::create_dir_all(&store_root)?;

        let mut config = Config::with_root(&store_root);
        config.flush.enabled = false;

        Ok(Self {
            _temp_dir: temp_dir,
            store_root,
            config,
        })
    }

    /// Same as [`TestEnvironment::new`] with the flusher ticking every `period`.
    pub fn with_flusher(period: Duration) -> anyhow::Result<Self> {
        let mut env = Self::new()?;
        env.config.flush.enabled = true;
        env.config.flush.period_ms = period.as_millis() as u64;
        Ok(env)
    }

    /// Path of a storage file inside the root
    pub fn file(&self, name: &str) -> PathBuf {
        self.store_root.join(name)
    }
}
