//! Cache and loading error types.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur inside a cache tier or while fetching.
///
/// None of these reach callers of the loader: they are logged and turned
/// into an absent result.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Failed to decode image.
    #[error("decode error: {0}")]
    DecodeError(String),
    /// I/O error during cache operation.
    #[error("io error: {0}")]
    IoError(String),
    /// Network error during download.
    #[error("network error: {0}")]
    NetworkError(String),
    /// The disk cache failed to open and is permanently off.
    #[error("disk cache disabled")]
    Disabled,
    /// Another writer already holds the entry.
    #[error("write already in progress for {0}")]
    WriteInProgress(String),
}

impl CacheError {
    /// Creates an I/O error with context.
    #[must_use]
    pub fn io(context: &str, err: &std::io::Error) -> Self {
        Self::IoError(format!("{context}: {err}"))
    }
}
