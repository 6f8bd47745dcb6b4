//! Cache Manager
//!
//! Exact-key TTL caching plus opt-in semantic matching on top of a
//! [`CacheBackend`].
//!
//! ## Lookup modes
//!
//! - `get` normalizes the key and returns an `Exact` hit or nothing.
//! - `get_semantic` tries the exact key first, then scans the namespace for
//!   the nearest embedding above the similarity threshold. Namespaces that
//!   are not opted in, or a manager without an embedder, degrade to exact
//!   matching and report `ExactFallback`.
//!
//! ## Disabled mode
//!
//! Any backend error switches the manager to disabled mode: lookups miss and
//! writes are dropped until `health_check` sees the backend answer again.
//! Nothing is retried inline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mini_moka::sync::Cache;
use serde::{Deserialize, Serialize};

use cascade_core::{CoreError, CoreResult, EventSink, LookupMode, OrchestrationEvent};

use super::backend::{CacheBackend, CacheEntry, InMemoryBackend};
use super::embedding::{cosine_similarity, Embedder};
use super::key::{normalize_key, text_hash};

// ============================================================================
// Configuration
// ============================================================================

/// Well-known namespaces.
pub mod namespaces {
    pub const EPHEMERAL: &str = "ephemeral";
    pub const PROVIDER: &str = "provider";
    pub const STABLE: &str = "stable";
    pub const PATTERN: &str = "pattern";
    pub const SPECULATIVE: &str = "speculative";
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch; a disabled cache never stores anything
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// TTL for namespaces without an explicit entry
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// TTL per namespace. `provider.memory` falls back to `provider`.
    #[serde(default = "default_namespace_ttls")]
    pub namespace_ttl_secs: BTreeMap<String, u64>,
    /// Namespaces that allow semantic lookups
    #[serde(default = "default_semantic_namespaces")]
    pub semantic_namespaces: Vec<String>,
    /// Minimum cosine similarity for a semantic hit
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Largest value accepted by `put`
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Keys longer than this are digested
    #[serde(default = "default_max_key_bytes")]
    pub max_key_bytes: usize,
    #[serde(default = "default_max_entries_per_namespace")]
    pub max_entries_per_namespace: u64,
    /// Capacity of the query embedding memo
    #[serde(default = "default_embedding_memo_entries")]
    pub embedding_memo_entries: u64,
    #[serde(default = "default_embedding_memo_ttl_secs")]
    pub embedding_memo_ttl_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_namespace_ttls() -> BTreeMap<String, u64> {
    BTreeMap::from([
        (namespaces::EPHEMERAL.to_string(), 5 * 60),
        (namespaces::PROVIDER.to_string(), 60 * 60),
        (namespaces::STABLE.to_string(), 24 * 60 * 60),
        (namespaces::PATTERN.to_string(), 10 * 60),
        (namespaces::SPECULATIVE.to_string(), 15 * 60),
    ])
}

fn default_semantic_namespaces() -> Vec<String> {
    vec![
        namespaces::PROVIDER.to_string(),
        namespaces::SPECULATIVE.to_string(),
    ]
}

fn default_similarity_threshold() -> f32 {
    0.85
}

fn default_max_payload_bytes() -> usize {
    64 * 1024
}

fn default_max_key_bytes() -> usize {
    256
}

fn default_max_entries_per_namespace() -> u64 {
    10_000
}

fn default_embedding_memo_entries() -> u64 {
    1_000
}

fn default_embedding_memo_ttl_secs() -> u64 {
    30 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            default_ttl_secs: default_ttl_secs(),
            namespace_ttl_secs: default_namespace_ttls(),
            semantic_namespaces: default_semantic_namespaces(),
            similarity_threshold: default_similarity_threshold(),
            max_payload_bytes: default_max_payload_bytes(),
            max_key_bytes: default_max_key_bytes(),
            max_entries_per_namespace: default_max_entries_per_namespace(),
            embedding_memo_entries: default_embedding_memo_entries(),
            embedding_memo_ttl_secs: default_embedding_memo_ttl_secs(),
        }
    }
}

/// A namespace followed by its parents: `provider.memory.ab12`,
/// `provider.memory`, `provider`.
fn lineage(namespace: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(namespace), |&ns| ns.rsplit_once('.').map(|(parent, _)| parent))
}

impl CacheConfig {
    /// TTL for a namespace: the closest configured ancestor, else the default.
    pub fn ttl_for(&self, namespace: &str) -> Duration {
        let secs = lineage(namespace)
            .find_map(|ns| self.namespace_ttl_secs.get(ns))
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }

    /// Whether semantic lookups are enabled for a namespace or an ancestor.
    pub fn is_semantic(&self, namespace: &str) -> bool {
        lineage(namespace).any(|ns| self.semantic_namespaces.iter().any(|n| n == ns))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl_secs == 0 {
            return Err("default_ttl_secs must be greater than 0".to_string());
        }
        if let Some((name, _)) = self.namespace_ttl_secs.iter().find(|(_, ttl)| **ttl == 0) {
            return Err(format!("TTL for namespace '{}' must be greater than 0", name));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err("similarity_threshold must be between 0.0 and 1.0".to_string());
        }
        if self.max_payload_bytes == 0 {
            return Err("max_payload_bytes must be greater than 0".to_string());
        }
        if self.max_key_bytes < 32 {
            return Err("max_key_bytes must be at least 32".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Results and statistics
// ============================================================================

/// A successful lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHit {
    pub value: String,
    pub mode: LookupMode,
    /// Cosine similarity for semantic hits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    /// Hit count of the entry after this lookup
    pub hit_count: u64,
}

/// Counters exposed by [`CacheManager::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub fallback_hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub rejected_payloads: u64,
    pub evictions: u64,
    pub entries: u64,
    pub disabled: bool,
    pub semantic_available: bool,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    exact_hits: AtomicU64,
    semantic_hits: AtomicU64,
    fallback_hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    rejected_payloads: AtomicU64,
    evictions: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ============================================================================
// Manager
// ============================================================================

/// Cache manager shared by the call path, the router and speculation.
pub struct CacheManager {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    embedder: Option<Arc<dyn Embedder>>,
    embedding_memo: Cache<[u8; 32], Arc<Vec<f32>>>,
    disabled: AtomicBool,
    counters: Counters,
    events: Arc<dyn EventSink>,
}

impl CacheManager {
    /// Create a manager over `backend` without probing it.
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>, events: Arc<dyn EventSink>) -> Self {
        let embedding_memo = Cache::builder()
            .max_capacity(config.embedding_memo_entries.max(1))
            .time_to_live(Duration::from_secs(config.embedding_memo_ttl_secs.max(1)))
            .build();

        Self {
            config,
            backend,
            embedder: None,
            embedding_memo,
            disabled: AtomicBool::new(false),
            counters: Counters::default(),
            events,
        }
    }

    /// Create a manager over a fresh in-memory backend.
    pub fn in_memory(config: CacheConfig, events: Arc<dyn EventSink>) -> Self {
        let backend = Arc::new(InMemoryBackend::new(config.max_entries_per_namespace));
        Self::new(config, backend, events)
    }

    /// Create a manager and probe the backend once. An unreachable backend
    /// starts the manager in disabled mode.
    pub async fn connect(
        config: CacheConfig,
        backend: Arc<dyn CacheBackend>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let manager = Self::new(config, backend, events);
        if let Err(e) = manager.backend.health_check().await {
            manager.disable(&e.to_string());
        }
        manager
    }

    /// Attach an embedder, enabling semantic lookups.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub fn semantic_available(&self) -> bool {
        self.embedder.is_some()
    }

    fn bypassed(&self) -> bool {
        !self.config.enabled || self.is_disabled()
    }

    fn disable(&self, reason: &str) {
        if !self.disabled.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                backend = %self.backend.name(),
                reason = %reason,
                "Cache backend unavailable, switching to disabled mode"
            );
            self.events.emit(OrchestrationEvent::CacheDisabled {
                reason: reason.to_string(),
            });
        }
    }

    fn emit_lookup(&self, namespace: &str, mode: LookupMode, hit: bool, similarity: Option<f32>) {
        self.events.emit(OrchestrationEvent::CacheLookup {
            namespace: namespace.to_string(),
            mode,
            hit,
            similarity,
        });
    }

    fn miss(&self, namespace: &str, mode: LookupMode) -> Option<CacheHit> {
        bump(&self.counters.misses);
        self.emit_lookup(namespace, mode, false, None);
        None
    }

    /// Exact lookup.
    pub async fn get(&self, namespace: &str, key: &str) -> Option<CacheHit> {
        if self.bypassed() {
            return self.miss(namespace, LookupMode::Bypass);
        }

        let key = normalize_key(key, self.config.max_key_bytes);
        match self.backend.get(namespace, &key).await {
            Ok(Some(entry)) => Some(self.hit(namespace, &entry, LookupMode::Exact, None)),
            Ok(None) => self.miss(namespace, LookupMode::Exact),
            Err(e) => {
                self.disable(&e.to_string());
                self.miss(namespace, LookupMode::Bypass)
            }
        }
    }

    /// Semantic lookup with an optional threshold override.
    pub async fn get_semantic(
        &self,
        namespace: &str,
        text: &str,
        threshold: Option<f32>,
    ) -> Option<CacheHit> {
        if self.bypassed() {
            return self.miss(namespace, LookupMode::Bypass);
        }

        let semantic = self.embedder.is_some() && self.config.is_semantic(namespace);
        let exact_mode = if semantic {
            LookupMode::Exact
        } else {
            LookupMode::ExactFallback
        };

        let key = normalize_key(text, self.config.max_key_bytes);
        match self.backend.get(namespace, &key).await {
            Ok(Some(entry)) => return Some(self.hit(namespace, &entry, exact_mode, None)),
            Ok(None) => {}
            Err(e) => {
                self.disable(&e.to_string());
                return self.miss(namespace, LookupMode::Bypass);
            }
        }

        if !semantic {
            return self.miss(namespace, LookupMode::ExactFallback);
        }

        let query = match self.embed(text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(namespace = %namespace, error = %e, "Query embedding failed");
                return self.miss(namespace, LookupMode::Semantic);
            }
        };

        let entries = match self.backend.entries(namespace).await {
            Ok(entries) => entries,
            Err(e) => {
                self.disable(&e.to_string());
                return self.miss(namespace, LookupMode::Bypass);
            }
        };

        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let best = entries
            .iter()
            .filter_map(|entry| {
                entry
                    .embedding
                    .as_ref()
                    .map(|e| (entry, cosine_similarity(&query, e)))
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((entry, similarity)) if similarity >= threshold => {
                tracing::debug!(
                    namespace = %namespace,
                    similarity = similarity,
                    "Semantic cache hit"
                );
                Some(self.hit(namespace, entry, LookupMode::Semantic, Some(similarity)))
            }
            _ => self.miss(namespace, LookupMode::Semantic),
        }
    }

    fn hit(
        &self,
        namespace: &str,
        entry: &CacheEntry,
        mode: LookupMode,
        similarity: Option<f32>,
    ) -> CacheHit {
        let hit_count = entry.record_hit();
        match mode {
            LookupMode::Semantic => bump(&self.counters.semantic_hits),
            LookupMode::ExactFallback => bump(&self.counters.fallback_hits),
            _ => bump(&self.counters.exact_hits),
        }
        self.emit_lookup(namespace, mode, true, similarity);
        CacheHit {
            value: entry.value.clone(),
            mode,
            similarity,
            hit_count,
        }
    }

    /// Store a value. Oversized payloads are rejected, never truncated.
    pub async fn put(&self, namespace: &str, key: &str, value: impl Into<String>) -> CoreResult<()> {
        if self.bypassed() {
            return Ok(());
        }

        let value = value.into();
        if value.len() > self.config.max_payload_bytes {
            bump(&self.counters.rejected_payloads);
            tracing::debug!(
                namespace = %namespace,
                size = value.len(),
                max = self.config.max_payload_bytes,
                "Rejected oversized cache payload"
            );
            return Err(CoreError::PayloadTooLarge {
                size: value.len(),
                max: self.config.max_payload_bytes,
            });
        }

        let normalized = normalize_key(key, self.config.max_key_bytes);
        let mut entry = CacheEntry::new(namespace, normalized, value, self.config.ttl_for(namespace));

        if self.embedder.is_some() && self.config.is_semantic(namespace) {
            match self.embed(key).await {
                Ok(embedding) => entry = entry.with_embedding(embedding),
                Err(e) => {
                    tracing::debug!(namespace = %namespace, error = %e, "Storing entry without embedding");
                }
            }
        }

        if let Err(e) = self.backend.put(entry).await {
            self.disable(&e.to_string());
            return Err(CoreError::cache_unavailable(e.to_string()));
        }
        bump(&self.counters.puts);
        Ok(())
    }

    /// Whether a live entry exists. Does not count as a lookup.
    pub async fn contains(&self, namespace: &str, key: &str) -> bool {
        if self.bypassed() {
            return false;
        }
        let key = normalize_key(key, self.config.max_key_bytes);
        matches!(self.backend.get(namespace, &key).await, Ok(Some(_)))
    }

    /// Remove one entry.
    pub async fn invalidate(&self, namespace: &str, key: &str) -> bool {
        if self.is_disabled() {
            return false;
        }
        let key = normalize_key(key, self.config.max_key_bytes);
        match self.backend.remove(namespace, &key).await {
            Ok(removed) => {
                if removed {
                    bump(&self.counters.evictions);
                }
                removed
            }
            Err(e) => {
                self.disable(&e.to_string());
                false
            }
        }
    }

    /// Remove a whole namespace.
    pub async fn invalidate_namespace(&self, namespace: &str) -> usize {
        if self.is_disabled() {
            return 0;
        }
        match self.backend.clear_namespace(namespace).await {
            Ok(count) => {
                self.counters
                    .evictions
                    .fetch_add(count as u64, Ordering::Relaxed);
                tracing::debug!(namespace = %namespace, count = count, "Invalidated cache namespace");
                count
            }
            Err(e) => {
                self.disable(&e.to_string());
                0
            }
        }
    }

    /// Drop expired entries from the backend.
    pub async fn sweep_expired(&self) -> usize {
        if self.is_disabled() {
            return 0;
        }
        match self.backend.sweep_expired().await {
            Ok(count) => {
                self.counters
                    .evictions
                    .fetch_add(count as u64, Ordering::Relaxed);
                count
            }
            Err(e) => {
                self.disable(&e.to_string());
                0
            }
        }
    }

    /// Probe the backend, re-enabling a disabled manager when it answers.
    pub async fn health_check(&self) -> bool {
        match self.backend.health_check().await {
            Ok(()) => {
                if self.disabled.swap(false, Ordering::AcqRel) {
                    tracing::info!(backend = %self.backend.name(), "Cache backend recovered");
                    self.events.emit(OrchestrationEvent::CacheRecovered);
                }
                true
            }
            Err(e) => {
                self.disable(&e.to_string());
                false
            }
        }
    }

    /// Cosine similarity of two texts, if an embedder is attached.
    pub async fn text_similarity(&self, a: &str, b: &str) -> Option<f32> {
        self.embedder.as_ref()?;
        let left = self.embed(a).await.ok()?;
        let right = self.embed(b).await.ok()?;
        Some(cosine_similarity(&left, &right))
    }

    /// Embed through the memo.
    async fn embed(&self, text: &str) -> CoreResult<Arc<Vec<f32>>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| CoreError::internal("no embedder configured"))?;

        let hash = text_hash(text);
        if let Some(vector) = self.embedding_memo.get(&hash) {
            return Ok(vector);
        }

        let vector = Arc::new(embedder.embed(text).await?);
        self.embedding_memo.insert(hash, vector.clone());
        Ok(vector)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let exact_hits = self.counters.exact_hits.load(Ordering::Relaxed);
        let semantic_hits = self.counters.semantic_hits.load(Ordering::Relaxed);
        let fallback_hits = self.counters.fallback_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let hits = exact_hits + semantic_hits + fallback_hits;
        let hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };

        CacheStats {
            exact_hits,
            semantic_hits,
            fallback_hits,
            misses,
            puts: self.counters.puts.load(Ordering::Relaxed),
            rejected_payloads: self.counters.rejected_payloads.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: if self.is_disabled() {
                0
            } else {
                self.backend.entry_count()
            },
            disabled: self.is_disabled(),
            semantic_available: self.semantic_available(),
            hit_rate,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
