//! Cache Backends
//!
//! The cache manager talks to storage through [`CacheBackend`]. The
//! in-process [`InMemoryBackend`] keeps one bounded `mini_moka` cache per
//! namespace inside a `DashMap`, so namespaces never contend on a shared
//! lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use mini_moka::sync::{Cache, ConcurrentCacheExt};

use cascade_core::CoreResult;

// ============================================================================
// Entry
// ============================================================================

/// A cached value.
///
/// Clones share the hit counter, so a hit recorded on a clone returned by a
/// backend is visible to later lookups.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub namespace: String,
    pub value: String,
    pub created_at: Instant,
    pub ttl: Duration,
    pub embedding: Option<Arc<Vec<f32>>>,
    hits: Arc<AtomicU64>,
}

impl CacheEntry {
    pub fn new(
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            namespace: namespace.into(),
            value: value.into(),
            created_at: Instant::now(),
            ttl,
            embedding: None,
            hits: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_embedding(mut self, embedding: Arc<Vec<f32>>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn record_hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Whether the entry is past its TTL at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// Storage behind the cache manager.
///
/// Backends report transport problems as `CacheUnavailable`; the manager
/// reacts by switching to disabled mode.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch a live entry. Expired entries are never returned.
    async fn get(&self, namespace: &str, key: &str) -> CoreResult<Option<CacheEntry>>;

    /// Insert or replace an entry.
    async fn put(&self, entry: CacheEntry) -> CoreResult<()>;

    /// Remove one entry. Returns whether it existed.
    async fn remove(&self, namespace: &str, key: &str) -> CoreResult<bool>;

    /// Remove every entry of a namespace. Returns how many were removed.
    async fn clear_namespace(&self, namespace: &str) -> CoreResult<usize>;

    /// Live entries of a namespace (used for semantic scans).
    async fn entries(&self, namespace: &str) -> CoreResult<Vec<CacheEntry>>;

    /// Drop expired entries everywhere. Returns how many were dropped.
    async fn sweep_expired(&self) -> CoreResult<usize>;

    /// Cheap reachability probe.
    async fn health_check(&self) -> CoreResult<()>;

    /// Approximate number of stored entries.
    fn entry_count(&self) -> u64;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// In-process backend sharded per namespace.
///
/// Expiry follows each entry's own TTL, so entries with different TTLs can
/// share a namespace. Expired entries are hidden from reads at once and keep
/// their slot until they are read, swept or evicted for capacity. A sweep
/// counts every expired entry it drops and removes namespaces left empty.
pub struct InMemoryBackend {
    shards: DashMap<String, Cache<String, CacheEntry>>,
    max_entries_per_namespace: u64,
}

impl InMemoryBackend {
    pub fn new(max_entries_per_namespace: u64) -> Self {
        Self {
            shards: DashMap::new(),
            max_entries_per_namespace: max_entries_per_namespace.max(1),
        }
    }

    fn shard(&self, namespace: &str) -> Option<Cache<String, CacheEntry>> {
        self.shards.get(namespace).map(|s| s.value().clone())
    }

    fn shard_or_create(&self, namespace: &str) -> Cache<String, CacheEntry> {
        let max = self.max_entries_per_namespace;
        self.shards
            .entry(namespace.to_string())
            .or_insert_with(|| Cache::builder().max_capacity(max).build())
            .value()
            .clone()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn get(&self, namespace: &str, key: &str) -> CoreResult<Option<CacheEntry>> {
        let Some(shard) = self.shard(namespace) else {
            return Ok(None);
        };
        match shard.get(&key.to_string()) {
            Some(entry) if entry.is_expired() => {
                shard.invalidate(&key.to_string());
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn put(&self, entry: CacheEntry) -> CoreResult<()> {
        let shard = self.shard_or_create(&entry.namespace);
        shard.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> CoreResult<bool> {
        let Some(shard) = self.shard(namespace) else {
            return Ok(false);
        };
        let key = key.to_string();
        let existed = shard.contains_key(&key);
        shard.invalidate(&key);
        Ok(existed)
    }

    async fn clear_namespace(&self, namespace: &str) -> CoreResult<usize> {
        let Some(shard) = self.shard(namespace) else {
            return Ok(0);
        };
        let keys: Vec<String> = shard.iter().map(|e| e.key().clone()).collect();
        for key in &keys {
            shard.invalidate(key);
        }
        shard.sync();
        Ok(keys.len())
    }

    async fn entries(&self, namespace: &str) -> CoreResult<Vec<CacheEntry>> {
        let Some(shard) = self.shard(namespace) else {
            return Ok(Vec::new());
        };
        let now = Instant::now();
        Ok(shard
            .iter()
            .filter(|e| !e.value().is_expired_at(now))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn sweep_expired(&self) -> CoreResult<usize> {
        let now = Instant::now();
        let shards: Vec<(String, Cache<String, CacheEntry>)> = self
            .shards
            .iter()
            .map(|s| (s.key().clone(), s.value().clone()))
            .collect();

        let mut removed = 0;
        for (namespace, shard) in shards {
            let expired: Vec<String> = shard
                .iter()
                .filter(|e| e.value().is_expired_at(now))
                .map(|e| e.key().clone())
                .collect();
            for key in &expired {
                shard.invalidate(key);
            }
            shard.sync();
            removed += expired.len();

            // A put racing with this removal lands in a dropped shard and
            // only costs a later miss.
            self.shards
                .remove_if(&namespace, |_, cache| cache.iter().next().is_none());
        }
        Ok(removed)
    }

    async fn health_check(&self) -> CoreResult<()> {
        Ok(())
    }

    fn entry_count(&self) -> u64 {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|s| {
                s.value()
                    .iter()
                    .filter(|e| !e.value().is_expired_at(now))
                    .count() as u64
            })
            .sum()
    }
}
