//! Embedding Abstraction
//!
//! Semantic cache lookups need a text embedder. Remote embedding services
//! implement [`Embedder`]; [`HashingEmbedder`] is a local bag-of-words
//! embedder (unigrams plus bigrams, feature hashed into a fixed dimension)
//! that needs no network and is good enough to catch near-duplicate queries.

use async_trait::async_trait;

use cascade_core::{CoreError, CoreResult};

/// Text embedding service.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedder name for logs.
    fn name(&self) -> &str;

    /// Vector dimension.
    fn dimension(&self) -> usize;

    /// Embed one text.
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>>;
}

/// Default dimension of the hashing embedder.
pub const DEFAULT_HASHING_DIMENSION: usize = 512;

/// Weight of a function word, or of a bigram made only of function words.
const FUNCTION_WORD_WEIGHT: f32 = 0.3;

/// Common English function words, sorted for binary search.
const FUNCTION_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "could", "do", "does", "for", "from",
    "how", "i", "in", "is", "it", "me", "my", "of", "on", "or", "our", "please", "should", "so",
    "that", "the", "their", "them", "there", "these", "this", "to", "was", "we", "were", "what",
    "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

fn is_function_word(token: &str) -> bool {
    FUNCTION_WORDS.binary_search(&token).is_ok()
}

/// Local feature-hashing embedder.
///
/// Function words are down-weighted so content words carry the score. It
/// has no notion of entities: two long queries that differ in a single name
/// still share most of their features (about 0.8 for a ten-word query).
/// Keep the similarity threshold at 0.85 or above with this embedder, and
/// use a real [`Embedder`] where such queries must never share an answer.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Synchronous embedding; the trait method delegates here.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimension];

        for token in &tokens {
            let weight = if is_function_word(token) {
                FUNCTION_WORD_WEIGHT
            } else {
                1.0
            };
            vector[self.bucket(token)] += weight;
        }
        for pair in tokens.windows(2) {
            let weight = if is_function_word(&pair[0]) && is_function_word(&pair[1]) {
                FUNCTION_WORD_WEIGHT
            } else {
                1.0
            };
            let bigram = format!("{} {}", pair[0], pair[1]);
            vector[self.bucket(&bigram)] += weight;
        }

        l2_normalize(&mut vector);
        vector
    }

    fn bucket(&self, feature: &str) -> usize {
        (fnv1a(feature.as_bytes()) % self.dimension as u64) as usize
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(CoreError::provider_failure("cannot embed empty text"));
        }
        Ok(self.embed_text(text))
    }
}

/// Lowercased alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ *b as u64).wrapping_mul(PRIME))
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two vectors. Mismatched or empty vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
