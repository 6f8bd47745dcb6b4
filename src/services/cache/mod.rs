//! Cache Module
//!
//! Exact-key TTL caching with opt-in semantic matching:
//! - `key` - Key normalization and digests
//! - `embedding` - Embedder trait, local hashing embedder, cosine similarity
//! - `backend` - Backend trait and the namespace-sharded in-memory backend
//! - `manager` - Lookups, writes, disabled mode and statistics

pub mod backend;
pub mod embedding;
pub mod key;
pub mod manager;

pub use backend::{CacheBackend, CacheEntry, InMemoryBackend};
pub use embedding::{cosine_similarity, Embedder, HashingEmbedder};
pub use key::normalize_key;
pub use manager::{namespaces, CacheConfig, CacheHit, CacheManager, CacheStats};
