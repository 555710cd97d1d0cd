// src/cache.rs

//! File Cache (§4.3): LRU + size + TTL eviction with watcher-based
//! invalidation.
//!
//! Combines `ChunkCache`/`CacheStats`-style eviction bookkeeping with a
//! negative-cache-style TTL expiry check into one cache keyed by normalized
//! path instead of content-addressed chunk id.

use crate::error::Result;
use crate::fs_service::{FileSystemService, ReadResult};
use crate::hash::{hash_bytes, HashAlgorithm};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache configuration (§4.3).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size_bytes: u64,
    pub max_entries: usize,
    /// 0 = infinite (entries never expire by age).
    pub ttl_ms: u64,
    pub enable_watching: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 256 * 1024 * 1024,
            max_entries: 10_000,
            ttl_ms: 0,
            enable_watching: true,
        }
    }
}

/// Decoded content for a cached file.
#[derive(Debug, Clone)]
pub enum CacheContent {
    Text(String),
    Binary,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    content: CacheContent,
    size: u64,
    hash: String,
    inserted_at: Instant,
    last_access: Instant,
}

/// Hit/miss/eviction counters (§4.3 `getStats`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub current_size: u64,
}

struct State {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
    /// Present only while `enable_watching` and a path has an active
    /// subscription; dropping the debouncer releases the OS watch.
    watchers: HashMap<String, notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>>,
}

/// Path -> decoded content cache, backed by a [`FileSystemService`].
pub struct FileCache {
    config: CacheConfig,
    /// `Arc`-wrapped so the watcher callback below can hold its own handle
    /// and lock it from the debouncer's background thread, without needing
    /// a `'static` reference back to the owning `FileCache`.
    state: Arc<Mutex<State>>,
}

impl FileCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                stats: CacheStats::default(),
                watchers: HashMap::new(),
            })),
        }
    }

    /// Idempotent key normalization so `./a/b`, `a/b`, and `a//b` collide.
    pub fn normalize(path: &str) -> String {
        let mut normalized = PathBuf::new();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(c) => normalized.push(c),
                Component::RootDir => normalized.push("/"),
                _ => {}
            }
        }
        normalized.to_string_lossy().replace('\\', "/")
    }

    /// Return the cached entry if fresh, otherwise load through `fs`,
    /// caching the result if it fits. Errors are returned but never cached.
    pub fn get(&self, fs: &FileSystemService, path: &str) -> Result<CacheContent> {
        let key = Self::normalize(path);

        {
            let mut state = self.state.lock();
            if let Some(entry) = state.entries.get(&key) {
                if !self.is_expired(entry) {
                    let content = entry.content.clone();
                    if let Some(entry) = state.entries.get_mut(&key) {
                        entry.last_access = Instant::now();
                    }
                    state.stats.hits += 1;
                    return Ok(content);
                }
                // Expired: counts as a miss plus an eviction (§4.3 TTL).
                let evicted = state.entries.remove(&key).unwrap();
                state.stats.current_size -= evicted.size;
                state.stats.evictions += 1;
            }
            state.stats.misses += 1;
        }

        let result = match fs.read_many(&[path.to_string()]).remove(path) {
            Some(ReadResult::Text(text)) => CacheContent::Text(text),
            Some(ReadResult::Binary) => CacheContent::Binary,
            Some(ReadResult::Error(e)) => return Err(crate::error::Error::Internal(e)),
            None => return Err(crate::error::Error::Internal("read_many returned nothing".into())),
        };

        let size = match &result {
            CacheContent::Text(t) => t.len() as u64,
            CacheContent::Binary => fs.stat(path).map(|s| s.size).unwrap_or(0),
        };

        if size <= self.config.max_size_bytes {
            let hash = match &result {
                CacheContent::Text(t) => hash_bytes(HashAlgorithm::Xxh128, t.as_bytes()).value,
                CacheContent::Binary => String::new(),
            };
            let mut state = self.state.lock();
            let now = Instant::now();
            state.entries.insert(
                key.clone(),
                CacheEntry { content: result.clone(), size, hash, inserted_at: now, last_access: now },
            );
            state.stats.current_size += size;
            self.evict_if_needed(&mut state);
            if self.config.enable_watching {
                self.subscribe_watch(&mut state, fs, &key);
            }
        }

        Ok(result)
    }

    /// Fan out `get` across paths; independent failures don't abort others.
    pub fn get_many(
        &self,
        fs: &FileSystemService,
        paths: &[String],
    ) -> HashMap<String, Result<CacheContent>> {
        paths.iter().map(|p| (p.clone(), self.get(fs, p))).collect()
    }

    pub fn invalidate(&self, path: &str) {
        let key = Self::normalize(path);
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.remove(&key) {
            state.stats.current_size -= entry.size;
            state.stats.evictions += 1;
        }
        state.watchers.remove(&key);
    }

    pub fn invalidate_many(&self, paths: &[String]) {
        for path in paths {
            self.invalidate(path);
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.watchers.clear();
        state.stats.current_size = 0;
    }

    /// Evict least-recently-accessed entries until resident bytes fall at
    /// or below `target_bytes`. Returns the number of bytes actually freed.
    pub fn handle_memory_pressure(&self, target_bytes: u64) -> u64 {
        let mut state = self.state.lock();
        let before = state.stats.current_size;
        while state.stats.current_size > target_bytes {
            if !self.evict_one(&mut state) {
                break;
            }
        }
        before - state.stats.current_size
    }

    pub fn get_stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.config.ttl_ms != 0 && entry.inserted_at.elapsed() > Duration::from_millis(self.config.ttl_ms)
    }

    fn evict_if_needed(&self, state: &mut State) {
        while state.entries.len() > self.config.max_entries
            || state.stats.current_size > self.config.max_size_bytes
        {
            if !self.evict_one(state) {
                break;
            }
        }
    }

    /// Remove the single least-recently-accessed entry. Returns `false` if
    /// the cache is already empty.
    fn evict_one(&self, state: &mut State) -> bool {
        let victim = state
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        match victim {
            Some(key) => {
                if let Some(entry) = state.entries.remove(&key) {
                    state.stats.current_size -= entry.size;
                    state.stats.evictions += 1;
                }
                state.watchers.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Subscribe to filesystem changes for `key`, invalidating the cached
    /// entry (and counting an eviction, §4.3) whenever one fires. The
    /// callback holds a clone of the `Arc<Mutex<State>>` and locks it from
    /// the debouncer's own background thread, so it never has to reach back
    /// through a borrow of `self` that the calling thread might still hold.
    fn subscribe_watch(&self, state: &mut State, fs: &FileSystemService, key: &str) {
        if state.watchers.contains_key(key) {
            return;
        }
        let shared = Arc::clone(&self.state);
        let watched_key = key.to_string();
        let callback: crate::fs_service::WatchCallback = Box::new(move |_path| {
            let mut state = shared.lock();
            if let Some(entry) = state.entries.remove(&watched_key) {
                state.stats.current_size -= entry.size;
                state.stats.evictions += 1;
            }
        });
        if let Ok(debouncer) = fs.watch(key, callback) {
            state.watchers.insert(key.to_string(), debouncer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_guard::PathGuard;

    fn fixture(dir: &Path) -> (FileSystemService, FileCache) {
        let fs = FileSystemService::new(PathGuard::new(dir).unwrap());
        let cache = FileCache::new(CacheConfig { enable_watching: false, ..Default::default() });
        (fs, cache)
    }

    #[test]
    fn miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let (fs, cache) = fixture(dir.path());
        fs.write_many(&[("a.txt".to_string(), b"hello".to_vec())]).unwrap();

        cache.get(&fs, "a.txt").unwrap();
        cache.get(&fs, "a.txt").unwrap();
        let stats = cache.get_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn invalidate_forces_next_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (fs, cache) = fixture(dir.path());
        fs.write_many(&[("a.txt".to_string(), b"v1".to_vec())]).unwrap();
        cache.get(&fs, "a.txt").unwrap();

        fs.write_many(&[("a.txt".to_string(), b"v2".to_vec())]).unwrap();
        cache.invalidate("a.txt");
        match cache.get(&fs, "a.txt").unwrap() {
            CacheContent::Text(t) => assert_eq!(t, "v2"),
            CacheContent::Binary => panic!("expected text"),
        }
    }

    #[test]
    fn path_normalization_collides_equivalent_keys() {
        assert_eq!(FileCache::normalize("./a/b"), FileCache::normalize("a/b"));
        assert_eq!(FileCache::normalize("a//b"), FileCache::normalize("a/b"));
    }

    #[test]
    fn size_cap_evicts_until_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystemService::new(PathGuard::new(dir.path()).unwrap());
        let cache = FileCache::new(CacheConfig {
            max_size_bytes: 12,
            max_entries: 100,
            ttl_ms: 0,
            enable_watching: false,
        });
        fs.write_many(&[
            ("a.txt".to_string(), b"0123456789".to_vec()),
            ("b.txt".to_string(), b"0123456789".to_vec()),
        ])
        .unwrap();
        cache.get(&fs, "a.txt").unwrap();
        cache.get(&fs, "b.txt").unwrap();
        assert!(cache.get_stats().current_size <= 12);
    }

    #[test]
    fn entry_count_cap_evicts_lru() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystemService::new(PathGuard::new(dir.path()).unwrap());
        let cache = FileCache::new(CacheConfig {
            max_size_bytes: u64::MAX,
            max_entries: 1,
            ttl_ms: 0,
            enable_watching: false,
        });
        fs.write_many(&[
            ("a.txt".to_string(), b"a".to_vec()),
            ("b.txt".to_string(), b"b".to_vec()),
        ])
        .unwrap();
        cache.get(&fs, "a.txt").unwrap();
        cache.get(&fs, "b.txt").unwrap();
        assert_eq!(cache.get_stats().current_size, 1);
    }
}
