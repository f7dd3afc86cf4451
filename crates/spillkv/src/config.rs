//! Cache construction parameters.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use spillkv_store::StoreConfig;

use crate::error::{CacheError, CacheResult};

/// What happens to records left over from a previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Start empty: existing records are deleted on open.
    #[default]
    Wipe,
    /// Reopen and list every persisted key in the ghost tier.
    Keep,
}

/// Configuration for a [`TieredCache`](crate::TieredCache) backed by a `LogStore`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace; the store lives in `<root_dir>/<name>.spill`
    pub name: String,
    pub root_dir: PathBuf,
    /// Entries held in RAM (ramsize)
    pub memory_capacity: usize,
    /// Keys remembered as spilled to the store (dbsize)
    pub ghost_capacity: usize,
    pub retention: Retention,
    /// Run `check_consistency` after every mutating operation
    pub verify: bool,
    pub store: StoreConfig,
}

impl CacheConfig {
    pub fn new(name: impl Into<String>, root_dir: impl AsRef<Path>, memory_capacity: usize, ghost_capacity: usize) -> Self {
        Self {
            name: name.into(),
            root_dir: root_dir.as_ref().to_path_buf(),
            memory_capacity,
            ghost_capacity,
            retention: Retention::Wipe,
            verify: false,
            store: StoreConfig::relaxed(),
        }
    }

    pub fn retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Directory holding this cache's segments.
    pub fn store_dir(&self) -> PathBuf {
        self.root_dir.join(format!("{}.spill", self.name))
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> CacheResult<(NonZeroUsize, NonZeroUsize)> {
        if self.name.is_empty() || self.name.contains(|c: char| c == '/' || c == '\\') || self.name == "." || self.name == ".." {
            return Err(CacheError::InvalidConfig(format!(
                "name must be a plain, non-empty file name: {:?}",
                self.name
            )));
        }
        let memory = NonZeroUsize::new(self.memory_capacity)
            .ok_or_else(|| CacheError::InvalidConfig("memory_capacity must be > 0".into()))?;
        let ghost = NonZeroUsize::new(self.ghost_capacity)
            .ok_or_else(|| CacheError::InvalidConfig("ghost_capacity must be > 0".into()))?;
        self.store.validate()?;
        Ok((memory, ghost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_dir_uses_namespace() {
        let config = CacheConfig::new("sessions", "/var/cache", 10, 100);
        assert_eq!(config.store_dir(), PathBuf::from("/var/cache/sessions.spill"));
        assert_eq!(config.retention, Retention::Wipe);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = CacheConfig::new("c", "/tmp", 0, 1);
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
        let config = CacheConfig::new("c", "/tmp", 1, 0);
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_names_rejected() {
        for name in ["", "..", "a/b"] {
            assert!(CacheConfig::new(name, "/tmp", 1, 1).validate().is_err(), "{:?}", name);
        }
    }

    #[test]
    fn test_bad_store_config_surfaces() {
        let mut store = StoreConfig::default();
        store.max_key_size = 0;
        let config = CacheConfig::new("c", "/tmp", 1, 1).store(store);
        assert!(matches!(config.validate(), Err(CacheError::Store(_))));
    }

    #[test]
    fn test_builder_setters() {
        let config = CacheConfig::new("c", "/tmp", 1, 1)
            .retention(Retention::Keep)
            .verify(true)
            .store(StoreConfig::durable());
        assert_eq!(config.retention, Retention::Keep);
        assert!(config.verify);
        assert!(config.store.sync_writes);
    }
}
