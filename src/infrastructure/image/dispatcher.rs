//! Asynchronous load dispatch.
//!
//! Memory hits are delivered inline. Everything else goes through an
//! unbounded FIFO drained by a worker loop that caps concurrent loads with a
//! semaphore, and results are posted to the completion context.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, trace, warn};

use crate::domain::entities::LoadRequest;

use super::completion::CompletionPoster;
use super::loader::ImageLoader;

const FALLBACK_CPU_COUNT: usize = 4;

/// Worker pool bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    /// Threads kept alive for async work.
    pub core: usize,
    /// Upper bound on concurrent loads.
    pub max: usize,
}

impl PoolSize {
    /// Creates pool bounds, clamping `core` to at least one and `max` to at
    /// least `core`.
    #[must_use]
    pub fn new(core: usize, max: usize) -> Self {
        let core = core.max(1);
        Self {
            core,
            max: max.max(core),
        }
    }

    /// Sizes the pool from the host: `cpus + 1` core, `2 * cpus + 1` max.
    #[must_use]
    pub fn for_host() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(FALLBACK_CPU_COUNT);
        Self::new(cpus + 1, 2 * cpus + 1)
    }
}

impl Default for PoolSize {
    fn default() -> Self {
        Self::for_host()
    }
}

/// How a request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Served from memory and delivered before `load_async` returned.
    Inline,
    /// Handed to the worker pool; delivery follows on the completion thread.
    Queued,
}

/// Runs loads off the calling thread and posts results for delivery.
pub struct ImageDispatcher {
    loader: Arc<ImageLoader>,
    completions: CompletionPoster,
    request_tx: mpsc::UnboundedSender<LoadRequest>,
    queued: Arc<AtomicU64>,
}

impl std::fmt::Debug for ImageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDispatcher")
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

struct WorkerState {
    loader: Arc<ImageLoader>,
    completions: CompletionPoster,
    semaphore: Arc<Semaphore>,
    request_rx: mpsc::UnboundedReceiver<LoadRequest>,
}

impl ImageDispatcher {
    /// Creates a dispatcher and spawns its worker loop.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(loader: Arc<ImageLoader>, completions: CompletionPoster, pool: PoolSize) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        let state = WorkerState {
            loader: loader.clone(),
            completions: completions.clone(),
            semaphore: Arc::new(Semaphore::new(pool.max)),
            request_rx,
        };
        tokio::spawn(Self::run_worker_loop(state));
        debug!(core = pool.core, max = pool.max, "Image dispatcher started");

        Self {
            loader,
            completions,
            request_tx,
            queued: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Loads an image and delivers it to the completion sink.
    ///
    /// A memory hit is delivered on the calling thread before this returns.
    /// Otherwise the request is queued and exactly one result, possibly
    /// absent, is delivered later on the completion thread.
    pub fn load_async(&self, request: LoadRequest) -> Dispatch {
        let key = self.loader.key_for(&request.uri);
        if let Some(image) = self.loader.check_memory_cache(&key) {
            self.completions.deliver_inline(request.target, image);
            return Dispatch::Inline;
        }

        self.queued.fetch_add(1, Ordering::Relaxed);
        let target = request.target;
        if self.request_tx.send(request).is_err() {
            warn!(target_id = %target, "Dispatcher worker stopped, delivering no image");
            self.completions.post(target, None);
        }
        Dispatch::Queued
    }

    /// Number of requests handed to the worker pool so far.
    #[must_use]
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// The loader this dispatcher drives.
    #[must_use]
    pub const fn loader(&self) -> &Arc<ImageLoader> {
        &self.loader
    }

    async fn run_worker_loop(mut state: WorkerState) {
        while let Some(request) = state.request_rx.recv().await {
            let Ok(permit) = state.semaphore.clone().acquire_owned().await else {
                break;
            };
            let loader = state.loader.clone();
            let completions = state.completions.clone();

            tokio::spawn(async move {
                trace!(uri = %request.uri, target_id = %request.target, "Running queued load");
                let image = match loader.load(&request.uri, request.budget).await {
                    Ok(loaded) => loaded.map(|l| l.image),
                    Err(e) => {
                        error!(uri = %request.uri, error = %e, "Queued load failed");
                        None
                    }
                };
                completions.post(request.target, image);
                drop(permit);
            });
        }
        debug!("Image dispatcher worker loop exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::domain::entities::{DecodeBudget, TargetId};
    use crate::domain::ports::mocks::MockCompletionSink;
    use crate::infrastructure::image::codec::ImageCrateCodec;
    use crate::infrastructure::image::completion::{COMPLETION_THREAD_NAME, CompletionQueue};
    use crate::infrastructure::image::context::ThreadAffinity;
    use crate::infrastructure::image::disk_cache::DiskImageCache;
    use crate::infrastructure::image::memory_cache::MemoryImageCache;
    use crate::infrastructure::image::test_support::{Delivery, FakeFetcher, RecordingSink};

    const URI: &str = "https://example/img.png";
    const WAIT: Duration = Duration::from_secs(10);

    async fn loader(fetcher: Arc<FakeFetcher>, temp: &TempDir) -> Arc<ImageLoader> {
        let disk = DiskImageCache::open(temp.path().join("bitmap"), 1024 * 1024).await;
        Arc::new(ImageLoader::new(
            Arc::new(MemoryImageCache::new(64 * 1024)),
            Arc::new(disk),
            fetcher,
            Arc::new(ImageCrateCodec),
        ))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("delivery within timeout")
            .expect("sink alive")
    }

    #[test_case::test_case(0, 0, 1, 1 ; "zero_clamps_to_one")]
    #[test_case::test_case(3, 2, 3, 3 ; "max_not_below_core")]
    #[test_case::test_case(5, 9, 5, 9 ; "kept")]
    fn test_pool_size_clamps(core: usize, max: usize, want_core: usize, want_max: usize) {
        assert_eq!(PoolSize::new(core, max), PoolSize {
            core: want_core,
            max: want_max
        });
    }

    #[test]
    fn test_host_pool_shape() {
        let pool = PoolSize::for_host();
        assert_eq!(pool.max, 2 * (pool.core - 1) + 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_memory_hit_delivers_inline_without_scheduling() {
        let temp = TempDir::new().expect("temp dir");
        let fetcher = Arc::new(FakeFetcher::png(8, 8));
        let loader = loader(fetcher.clone(), &temp).await;

        // Warm memory through a normal load.
        let warmed = loader
            .load(URI, DecodeBudget::unbounded())
            .await
            .expect("load")
            .expect("image");

        let delivered = Arc::new(AtomicBool::new(false));
        let seen = delivered.clone();
        let expected = warmed.image.clone();
        let mut sink = MockCompletionSink::new();
        sink.expect_deliver()
            .times(1)
            .returning(move |target, image| {
                assert_eq!(target, TargetId(1));
                assert!(image.is_some_and(|img| Arc::ptr_eq(&img, &expected)));
                seen.store(true, Ordering::SeqCst);
            });

        let affinity = ThreadAffinity::new();
        let queue = CompletionQueue::start(Arc::new(sink), &affinity).expect("start");
        let dispatcher = ImageDispatcher::new(loader, queue.poster(), PoolSize::new(1, 2));

        let outcome = dispatcher.load_async(LoadRequest::new(URI, TargetId(1)));
        assert_eq!(outcome, Dispatch::Inline);
        assert!(delivered.load(Ordering::SeqCst));
        assert_eq!(dispatcher.queued(), 0);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_load_delivers_on_completion_thread() {
        let temp = TempDir::new().expect("temp dir");
        let fetcher = Arc::new(FakeFetcher::png(64, 64));
        let loader = loader(fetcher.clone(), &temp).await;

        let (sink, mut rx) = RecordingSink::new();
        let affinity = ThreadAffinity::new();
        let queue = CompletionQueue::start(sink, &affinity).expect("start");
        let dispatcher = ImageDispatcher::new(loader, queue.poster(), PoolSize::new(1, 2));

        let request = LoadRequest::new(URI, TargetId(3)).with_bounds(16, 16);
        assert_eq!(dispatcher.load_async(request), Dispatch::Queued);

        let delivery = next(&mut rx).await;
        assert_eq!(delivery.target, TargetId(3));
        assert_eq!(delivery.thread_name.as_deref(), Some(COMPLETION_THREAD_NAME));
        let image = delivery.image.expect("image");
        assert_eq!((image.width(), image.height()), (16, 16));
        assert_eq!(dispatcher.queued(), 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_load_delivers_absent() {
        let temp = TempDir::new().expect("temp dir");
        let loader = loader(Arc::new(FakeFetcher::failing()), &temp).await;

        let (sink, mut rx) = RecordingSink::new();
        let affinity = ThreadAffinity::new();
        let queue = CompletionQueue::start(sink, &affinity).expect("start");
        let dispatcher = ImageDispatcher::new(loader, queue.poster(), PoolSize::new(1, 2));

        dispatcher.load_async(LoadRequest::new(URI, TargetId(4)));
        let delivery = next(&mut rx).await;
        assert_eq!(delivery.target, TargetId(4));
        assert!(delivery.image.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_request_delivered_exactly_once() {
        let temp = TempDir::new().expect("temp dir");
        let loader = loader(Arc::new(FakeFetcher::png(8, 8)), &temp).await;

        let (sink, mut rx) = RecordingSink::new();
        let affinity = ThreadAffinity::new();
        let queue = CompletionQueue::start(sink, &affinity).expect("start");
        let dispatcher = ImageDispatcher::new(loader, queue.poster(), PoolSize::new(2, 3));

        for i in 0..20 {
            let uri = format!("https://example/img-{i}.png");
            dispatcher.load_async(LoadRequest::new(uri, TargetId(i)));
        }

        let mut targets = Vec::new();
        for _ in 0..20 {
            let delivery = next(&mut rx).await;
            assert!(delivery.image.is_some());
            targets.push(delivery.target.0);
        }
        targets.sort_unstable();
        assert_eq!(targets, (0..20).collect::<Vec<_>>());

        let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(extra.is_err(), "no request may be delivered twice");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_uri_each_get_one_delivery() {
        let temp = TempDir::new().expect("temp dir");
        let loader = loader(Arc::new(FakeFetcher::png(8, 8)), &temp).await;

        let (sink, mut rx) = RecordingSink::new();
        let affinity = ThreadAffinity::new();
        let queue = CompletionQueue::start(sink, &affinity).expect("start");
        let dispatcher = ImageDispatcher::new(loader, queue.poster(), PoolSize::new(4, 8));

        for i in 0..5 {
            dispatcher.load_async(LoadRequest::new(URI, TargetId(i)));
        }

        let mut delivered = Vec::new();
        for _ in 0..5 {
            delivered.push(next(&mut rx).await);
        }
        delivered.sort_by_key(|d| d.target.0);
        assert_eq!(
            delivered.iter().map(|d| d.target.0).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        // The writer that won the key always commits and reads back.
        assert!(delivered.iter().any(|d| d.image.is_some()));
    }
}
