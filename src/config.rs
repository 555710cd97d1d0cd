// src/config.rs

//! Engine configuration (§10.3).
//!
//! Plain struct with builder-style `with_*` methods and a `new()` that
//! derives subdirectories (the transaction directory) from a single base
//! path.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Programmatically-constructed configuration for one engine instance.
/// No external config-file format is parsed here (settings loading is out
/// of scope, §1) — an embedder builds this directly.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed root every path is resolved against (§4.1).
    pub root: PathBuf,

    pub max_cache_bytes: u64,
    pub max_cache_entries: usize,
    pub cache_ttl_ms: u64,
    pub enable_watching: bool,

    pub max_snapshots: usize,
    pub txn_dir: PathBuf,
    pub sweep_interval: Duration,
    pub max_transaction_age: Duration,

    pub default_max_concurrency: usize,
}

impl EngineConfig {
    /// A config rooted at `root`, with the transaction directory derived
    /// from it (`<root>/.fileops/transactions`) unless overridden.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let txn_dir = root.join(".fileops").join("transactions");
        Self {
            root,
            max_cache_bytes: 256 * 1024 * 1024,
            max_cache_entries: 10_000,
            cache_ttl_ms: 0,
            enable_watching: true,
            max_snapshots: 10_000,
            txn_dir,
            sweep_interval: Duration::from_secs(5 * 60),
            max_transaction_age: Duration::from_secs(60 * 60),
            default_max_concurrency: 4,
        }
    }

    pub fn with_max_cache_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = bytes;
        self
    }

    pub fn with_max_cache_entries(mut self, entries: usize) -> Self {
        self.max_cache_entries = entries;
        self
    }

    pub fn with_cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache_ttl_ms = ttl_ms;
        self
    }

    pub fn with_watching(mut self, enabled: bool) -> Self {
        self.enable_watching = enabled;
        self
    }

    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max;
        self
    }

    pub fn with_txn_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.txn_dir = dir.into();
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_transaction_age(mut self, age: Duration) -> Self {
        self.max_transaction_age = age;
        self
    }

    pub fn with_default_max_concurrency(mut self, n: usize) -> Self {
        self.default_max_concurrency = n.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_txn_dir_from_root() {
        let config = EngineConfig::new("/srv/project");
        assert_eq!(config.txn_dir, PathBuf::from("/srv/project/.fileops/transactions"));
    }

    #[test]
    fn builder_methods_override_defaults() {
        let config = EngineConfig::new("/tmp/x").with_max_cache_bytes(1024).with_default_max_concurrency(8);
        assert_eq!(config.max_cache_bytes, 1024);
        assert_eq!(config.default_max_concurrency, 8);
    }
}
