//! Infrastructure layer with caches and external service adapters.

/// Loader configuration.
pub mod config;
/// Image handling (keys, caches, loading, dispatch).
pub mod image;

pub use config::{CliArgs, ConfigStorage, LoaderConfig, LogLevel};
pub use self::image::{
    CacheStats, CompletionQueue, Dispatch, DiskImageCache, ImageDispatcher, ImageLoader,
    KeyDeriver, MemoryImageCache, PoolSize, ThreadAffinity,
};
