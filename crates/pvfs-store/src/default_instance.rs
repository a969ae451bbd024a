//! Process-wide registry for hosts that expect a single shared store.
//!
//! New code should pass an `Arc<FsRecords>` around explicitly; this exists
//! for callers that cannot thread a handle through.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use pvfs_config::Config;

use crate::error::Result;
use crate::store::FsRecords;

static INSTANCE: Lazy<RwLock<Option<Arc<FsRecords>>>> = Lazy::new(|| RwLock::new(None));

/// The registered store, if any.
pub fn get() -> Option<Arc<FsRecords>> {
    INSTANCE.read().clone()
}

/// The registered store, opening one from `config` on first use.
pub fn get_or_open(config: &Config) -> Result<Arc<FsRecords>> {
    if let Some(store) = get() {
        return Ok(store);
    }
    let mut slot = INSTANCE.write();
    if let Some(store) = slot.as_ref() {
        return Ok(store.clone());
    }
    let store = Arc::new(FsRecords::open(config)?);
    *slot = Some(store.clone());
    Ok(store)
}

/// Replace the registered store; returns the previous one.
pub fn install(store: Arc<FsRecords>) -> Option<Arc<FsRecords>> {
    INSTANCE.write().replace(store)
}

/// Unregister and close the store.
pub fn shutdown() -> Result<()> {
    let store = INSTANCE.write().take();
    match store {
        Some(store) => store.close(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvfs_config::testing::TestEnvironment;

    #[test]
    fn test_registry_lifecycle() {
        let env = TestEnvironment::new().unwrap();
        let first = get_or_open(&env.config).unwrap();
        let again = get_or_open(&env.config).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        shutdown().unwrap();
        assert!(get().is_none());
        assert!(first.create_record().is_err());
    }
}
