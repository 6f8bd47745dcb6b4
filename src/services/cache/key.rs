//! Cache key normalization.

use sha2::{Digest, Sha256};

/// Hex characters kept from the SHA-256 digest of an oversized key.
pub const DIGEST_HEX_LEN: usize = 32;

/// Normalize a raw key: trim, lowercase, collapse internal whitespace.
///
/// Keys longer than `max_bytes` after normalization are replaced by a
/// truncated SHA-256 digest of the normalized text.
pub fn normalize_key(raw: &str, max_bytes: usize) -> String {
    let normalized = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if normalized.len() <= max_bytes {
        normalized
    } else {
        digest_key(&normalized)
    }
}

/// Truncated hex SHA-256 digest.
pub fn digest_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash: [u8; 32] = hasher.finalize().into();
    let mut hex = String::with_capacity(DIGEST_HEX_LEN);
    for byte in hash.iter().take(DIGEST_HEX_LEN / 2) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Full SHA-256 of a text, used for memo keys.
pub fn text_hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}
