//! Image handling infrastructure.
//!
//! This module provides:
//! - Cache key derivation
//! - Memory caching with cost-bounded LRU eviction
//! - Journaled disk caching for persistence
//! - The memory, disk, network loading pipeline and its async dispatcher

pub mod codec;
pub mod completion;
pub mod context;
pub mod disk_cache;
pub mod dispatcher;
pub mod http;
mod journal;
pub mod key;
pub mod loader;
pub mod memory_cache;
pub mod sampling;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::ImageCrateCodec;
pub use completion::{CompletionPoster, CompletionQueue};
pub use context::ThreadAffinity;
pub use disk_cache::{DiskImageCache, DiskStats, DiskWriter};
pub use dispatcher::{Dispatch, ImageDispatcher, PoolSize};
pub use http::HttpFetcher;
pub use key::{KeyDeriver, KeyStrategy};
pub use loader::{ImageLoader, LoadResult};
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use sampling::sample_factor;
