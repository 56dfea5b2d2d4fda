//! Domain types for image loading and caching.

use std::sync::Arc;

/// Fixed-length identifier for an image in both cache tiers.
/// Derived from the resource URI; never reversible to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps an already-derived key string.
    ///
    /// Keys read back from the disk journal come through here; fresh keys
    /// should be produced by a `KeyDeriver`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key is usable as a file name inside the cache
    /// directory.
    #[must_use]
    pub fn is_valid_file_stem(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 120
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Requested decode bounds.
///
/// A zero on either axis means "no down-sampling constraint".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeBudget {
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
}

impl DecodeBudget {
    /// Creates a budget for the given bounds.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Budget that decodes at full resolution.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            width: 0,
            height: 0,
        }
    }

    /// Returns true if either axis is unset.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from in-memory LRU cache.
    MemoryCache,
    /// Decoded from the disk cache.
    DiskCache,
    /// Fetched from the network and populated into the disk cache first.
    Network,
    /// Fetched and decoded straight from the network; nothing was persisted.
    DirectNetwork,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
            Self::DirectNetwork => write!(f, "network (direct)"),
        }
    }
}

/// A decoded image together with its cache key and origin tier.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key the image is stored under.
    pub key: CacheKey,
    /// The decoded image.
    pub image: Arc<image::DynamicImage>,
    /// Tier that served the request.
    pub source: ImageSource,
}

/// Identity of the render target a result should be applied to.
///
/// The completion sink uses it to discard late deliveries for targets that
/// have since been recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// A single asynchronous load.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Resource URI.
    pub uri: String,
    /// Requested decode bounds.
    pub budget: DecodeBudget,
    /// Render target that receives the result.
    pub target: TargetId,
}

impl LoadRequest {
    /// Creates a request that decodes at full resolution.
    #[must_use]
    pub fn new(uri: impl Into<String>, target: TargetId) -> Self {
        Self {
            uri: uri.into(),
            budget: DecodeBudget::unbounded(),
            target,
        }
    }

    /// Sets the requested decode bounds.
    #[must_use]
    pub fn with_bounds(mut self, width: u32, height: u32) -> Self {
        self.budget = DecodeBudget::new(width, height);
        self
    }
}
