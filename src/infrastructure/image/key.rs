//! Cache key derivation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::domain::entities::CacheKey;

/// Length in bytes of the digest prefix kept for a key.
const DIGEST_BYTES: usize = 16;

/// How keys are derived from URIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// 128-bit digest prefix, rendered as 32 lowercase hex characters.
    #[default]
    Digest,
    /// 32-bit polynomial string hash, rendered as 8 hex characters.
    /// Collisions are easy to produce; only for hosts without a digest.
    Weak,
}

/// Maps URIs to fixed-length cache keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeriver {
    strategy: KeyStrategy,
}

impl KeyDeriver {
    /// Creates a deriver using the digest strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            strategy: KeyStrategy::Digest,
        }
    }

    /// Creates a deriver with an explicit strategy.
    #[must_use]
    pub fn with_strategy(strategy: KeyStrategy) -> Self {
        if strategy == KeyStrategy::Weak {
            warn!("Cache keys use the weak string hash; distinct URIs may collide");
        }
        Self { strategy }
    }

    /// Returns the active strategy.
    #[must_use]
    pub const fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    /// Returns true when keys come from the weak fallback hash.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self.strategy, KeyStrategy::Weak)
    }

    /// Derives the cache key for a URI.
    #[must_use]
    pub fn derive(&self, uri: &str) -> CacheKey {
        match self.strategy {
            KeyStrategy::Digest => digest_key(uri),
            KeyStrategy::Weak => weak_key(uri),
        }
    }
}

fn digest_key(uri: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(uri.as_bytes());
    let result = hasher.finalize();
    CacheKey::new(hex::encode(&result[..DIGEST_BYTES]))
}

fn weak_key(uri: &str) -> CacheKey {
    let hash = uri
        .bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
    CacheKey::new(format!("{hash:08x}"))
}
