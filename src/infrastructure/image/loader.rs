//! Image loading orchestrator.
//!
//! Implements a three-tier lookup: Memory -> Disk -> Network. Network
//! fetches populate the disk cache, disk decodes populate the memory cache.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::domain::entities::{CacheKey, DecodeBudget, ImageSource, LoadedImage};
use crate::domain::errors::{CacheError, CacheResult, LoaderError};
use crate::domain::ports::{ExecutionContext, ImageCodec, ImageFetcher};
use crate::infrastructure::config::LoaderConfig;

use super::codec::ImageCrateCodec;
use super::context::ThreadAffinity;
use super::disk_cache::{DiskImageCache, DiskStats, DiskWriter};
use super::http::HttpFetcher;
use super::key::KeyDeriver;
use super::memory_cache::{CacheStats, MemoryImageCache};
use super::sampling::sample_factor;

/// Result of a load: an image, absent on any recoverable failure, or a
/// misuse error.
pub type LoadResult = Result<Option<LoadedImage>, LoaderError>;

/// Orchestrates image loading from memory, disk, and network.
pub struct ImageLoader {
    keys: KeyDeriver,
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Arc<DiskImageCache>,
    fetcher: Arc<dyn ImageFetcher>,
    codec: Arc<dyn ImageCodec>,
    context: Arc<dyn ExecutionContext>,
    runtime: Option<Handle>,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("keys", &self.keys)
            .field("memory_capacity_kib", &self.memory_cache.capacity_kib())
            .field("disk_enabled", &self.disk_cache.is_enabled())
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a loader over the given caches and collaborators.
    ///
    /// No thread is treated as UI-affine until a context is supplied with
    /// [`with_context`](Self::with_context). If called inside a Tokio
    /// runtime, that runtime also backs [`load_blocking`](Self::load_blocking).
    #[must_use]
    pub fn new(
        memory_cache: Arc<MemoryImageCache>,
        disk_cache: Arc<DiskImageCache>,
        fetcher: Arc<dyn ImageFetcher>,
        codec: Arc<dyn ImageCodec>,
    ) -> Self {
        Self {
            keys: KeyDeriver::new(),
            memory_cache,
            disk_cache,
            fetcher,
            codec,
            context: Arc::new(ThreadAffinity::new()),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Builds a loader from configuration, opening the disk cache.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created. A disk cache that
    /// fails to open only disables that tier.
    pub async fn from_config(
        config: &LoaderConfig,
        context: Arc<dyn ExecutionContext>,
    ) -> CacheResult<Self> {
        let memory_cache = Arc::new(MemoryImageCache::with_heap_ceiling(
            config.memory.heap_ceiling_bytes,
            config.memory.divisor,
        ));

        let disk_cache = if config.disk.enabled {
            DiskImageCache::open(config.disk.effective_directory(), config.disk.capacity_bytes)
                .await
        } else {
            info!("Disk cache disabled by configuration");
            DiskImageCache::disabled()
        };

        let fetcher = Arc::new(HttpFetcher::new(config.network.timeout_secs)?);

        Ok(Self::new(
            memory_cache,
            Arc::new(disk_cache),
            fetcher,
            Arc::new(ImageCrateCodec),
        )
        .with_context(context)
        .with_key_deriver(KeyDeriver::with_strategy(config.key_strategy)))
    }

    /// Sets the context used to detect UI-affine callers.
    #[must_use]
    pub fn with_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = context;
        self
    }

    /// Sets the key deriver.
    #[must_use]
    pub fn with_key_deriver(mut self, keys: KeyDeriver) -> Self {
        self.keys = keys;
        self
    }

    /// Sets the runtime that drives [`load_blocking`](Self::load_blocking).
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Derives the cache key for a URI.
    #[must_use]
    pub fn key_for(&self, uri: &str) -> CacheKey {
        self.keys.derive(uri)
    }

    /// Returns true when keys come from the weak fallback hash.
    #[must_use]
    pub const fn keys_degraded(&self) -> bool {
        self.keys.is_degraded()
    }

    /// Returns true if the disk tier is active.
    #[must_use]
    pub fn disk_enabled(&self) -> bool {
        self.disk_cache.is_enabled()
    }

    /// Looks up the memory tier only, promoting on a hit.
    #[must_use]
    pub fn check_memory_cache(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        self.memory_cache.get(key)
    }

    /// Loads an image, checking caches first.
    ///
    /// Recoverable failures (network, I/O, decode) are logged and yield
    /// `Ok(None)`; the caller may retry.
    ///
    /// # Errors
    /// Returns [`LoaderError::BlockingOnUiContext`] if the image is not cached
    /// and the caller is on the UI-affine context.
    pub async fn load(&self, uri: &str, budget: DecodeBudget) -> LoadResult {
        let key = self.keys.derive(uri);

        if let Some(image) = self.memory_cache.get(&key) {
            return Ok(Some(LoadedImage {
                key,
                image,
                source: ImageSource::MemoryCache,
            }));
        }

        if self.disk_cache.is_enabled() {
            if self.context.is_ui_affine() {
                warn!(uri = %uri, "Reading disk cache from the UI context is not recommended");
            }

            if let Some(image) = self.load_from_disk(&key, budget).await {
                debug!(key = %key, source = "disk", "Image loaded successfully");
                return Ok(Some(LoadedImage {
                    key,
                    image,
                    source: ImageSource::DiskCache,
                }));
            }

            self.ensure_off_ui_context(uri)?;
            let image = self.load_from_network(&key, uri, budget).await;
            if image.is_some() {
                debug!(key = %key, source = "network", "Image loaded successfully");
            }
            return Ok(image.map(|image| LoadedImage {
                key,
                image,
                source: ImageSource::Network,
            }));
        }

        warn!(uri = %uri, "Disk cache is not available, fetching directly");
        self.ensure_off_ui_context(uri)?;
        match self.fetch_direct(uri).await {
            Ok(image) => Ok(Some(LoadedImage {
                key,
                image: Arc::new(image),
                source: ImageSource::DirectNetwork,
            })),
            Err(e) => {
                warn!(uri = %uri, error = %e, "Direct image fetch failed");
                Ok(None)
            }
        }
    }

    /// Blocking variant of [`load`](Self::load) for plain OS threads.
    ///
    /// Must not be called from inside an async task.
    ///
    /// # Errors
    /// Returns [`LoaderError::RuntimeUnavailable`] if the loader has no runtime
    /// to drive I/O, and whatever [`load`](Self::load) returns otherwise.
    pub fn load_blocking(&self, uri: &str, budget: DecodeBudget) -> LoadResult {
        let Some(runtime) = &self.runtime else {
            return Err(LoaderError::RuntimeUnavailable {
                message: "loader was built outside a Tokio runtime".to_string(),
            });
        };
        if Handle::try_current().is_ok() {
            return Err(LoaderError::RuntimeUnavailable {
                message: "load_blocking called from inside an async context".to_string(),
            });
        }
        runtime.block_on(self.load(uri, budget))
    }

    fn ensure_off_ui_context(&self, uri: &str) -> Result<(), LoaderError> {
        if self.context.is_ui_affine() {
            error!(uri = %uri, "Network fetch attempted from the UI context");
            return Err(LoaderError::ui_context(uri));
        }
        Ok(())
    }

    /// Decodes the disk blob for `key` and promotes it into memory.
    async fn load_from_disk(
        &self,
        key: &CacheKey,
        budget: DecodeBudget,
    ) -> Option<Arc<image::DynamicImage>> {
        let bytes = self.disk_cache.get(key).await?;

        match self.decode_sampled(bytes, budget).await {
            Ok(decoded) => {
                let image = Arc::new(decoded);
                self.memory_cache.put(key.clone(), image.clone());
                Some(image)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to decode cached image");
                None
            }
        }
    }

    /// Streams the network body into the disk cache, then reads it back.
    async fn load_from_network(
        &self,
        key: &CacheKey,
        uri: &str,
        budget: DecodeBudget,
    ) -> Option<Arc<image::DynamicImage>> {
        if let Some(mut writer) = self.disk_cache.begin_write(key).await {
            match self.download_into(uri, &mut writer).await {
                Ok(()) => {
                    if let Err(e) = self.disk_cache.commit(writer).await {
                        warn!(key = %key, error = %e, "Failed to commit downloaded image");
                    }
                }
                Err(e) => {
                    warn!(uri = %uri, error = %e, "Image download failed");
                    self.disk_cache.abort(writer).await;
                }
            }
            if let Err(e) = self.disk_cache.flush().await {
                warn!(error = %e, "Failed to flush disk cache journal");
            }
        } else {
            debug!(key = %key, "Disk cache write unavailable, re-checking disk");
        }

        self.load_from_disk(key, budget).await
    }

    async fn download_into(&self, uri: &str, writer: &mut DiskWriter) -> CacheResult<()> {
        let mut stream = self.fetcher.fetch(uri).await?;
        while let Some(chunk) = stream.next().await {
            writer.write_chunk(&chunk?).await?;
        }
        debug!(uri = %uri, key = %writer.key(), size = writer.written(), "Downloaded image into disk cache");
        Ok(())
    }

    /// Fetches and decodes at full resolution without touching the disk.
    async fn fetch_direct(&self, uri: &str) -> CacheResult<image::DynamicImage> {
        let mut stream = self.fetcher.fetch(uri).await?;
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }

        let codec = self.codec.clone();
        tokio::task::spawn_blocking(move || codec.decode(&body, 1))
            .await
            .map_err(|e| CacheError::DecodeError(format!("Decode task panicked: {e}")))?
    }

    async fn decode_sampled(
        &self,
        bytes: Bytes,
        budget: DecodeBudget,
    ) -> CacheResult<image::DynamicImage> {
        let codec = self.codec.clone();
        tokio::task::spawn_blocking(move || {
            let (width, height) = codec.probe_dimensions(&bytes)?;
            codec.decode(&bytes, sample_factor(width, height, budget))
        })
        .await
        .map_err(|e| CacheError::DecodeError(format!("Decode task panicked: {e}")))?
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.memory_cache.stats()
    }

    /// Returns disk cache counters.
    #[must_use]
    pub fn disk_stats(&self) -> DiskStats {
        self.disk_cache.stats()
    }

    /// Clears all caches.
    pub async fn clear_all(&self) {
        self.memory_cache.clear();
        if self.disk_cache.is_enabled()
            && let Err(e) = self.disk_cache.clear().await
        {
            warn!(error = %e, "Failed to clear disk cache");
        }
        info!("Cleared all image caches");
    }
}
