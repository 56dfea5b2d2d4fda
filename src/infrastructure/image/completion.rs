//! Serialized completion context.
//!
//! A single named thread drains a channel of finished loads and hands each
//! one to the [`CompletionSink`]. Inline deliveries take the same lock as
//! the drain loop, so the sink is never entered concurrently.

use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use image::DynamicImage;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::domain::entities::TargetId;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::CompletionSink;

use super::context::ThreadAffinity;

/// Name of the completion thread.
pub const COMPLETION_THREAD_NAME: &str = "image-completion";

struct Completion {
    target: TargetId,
    image: Option<Arc<DynamicImage>>,
}

/// Sink shared by the drain loop and inline callers; every call holds `lock`.
struct SerializedSink {
    sink: Arc<dyn CompletionSink>,
    lock: Mutex<()>,
}

impl SerializedSink {
    fn deliver(&self, target: TargetId, image: Option<Arc<DynamicImage>>) {
        let _guard = self.lock.lock();
        self.sink.deliver(target, image);
    }
}

/// Cloneable handle for posting results to the completion context.
#[derive(Clone)]
pub struct CompletionPoster {
    tx: mpsc::UnboundedSender<Completion>,
    sink: Arc<SerializedSink>,
}

impl CompletionPoster {
    /// Queues a result for delivery on the completion thread.
    ///
    /// Returns false if the completion thread has stopped.
    pub fn post(&self, target: TargetId, image: Option<Arc<DynamicImage>>) -> bool {
        if self.tx.send(Completion { target, image }).is_err() {
            warn!(target_id = %target, "Completion thread stopped, dropping result");
            return false;
        }
        true
    }

    /// Delivers a result on the calling thread, bypassing the queue.
    ///
    /// Waits for any delivery in progress on the completion thread.
    pub fn deliver_inline(&self, target: TargetId, image: Arc<DynamicImage>) {
        trace!(target_id = %target, "Delivering inline");
        self.sink.deliver(target, Some(image));
    }
}

/// Owns the completion thread.
pub struct CompletionQueue {
    poster: CompletionPoster,
    thread: JoinHandle<()>,
}

impl CompletionQueue {
    /// Starts the completion thread and marks it as the UI-affine context.
    ///
    /// # Errors
    /// Returns error if the thread cannot be spawned.
    pub fn start(sink: Arc<dyn CompletionSink>, affinity: &ThreadAffinity) -> CacheResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let sink = Arc::new(SerializedSink {
            sink,
            lock: Mutex::new(()),
        });
        let drain_sink = sink.clone();

        let thread = std::thread::Builder::new()
            .name(COMPLETION_THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(Completion { target, image }) = rx.blocking_recv() {
                    trace!(target_id = %target, present = image.is_some(), "Delivering result");
                    drain_sink.deliver(target, image);
                }
                debug!("Completion queue drained, thread exiting");
            })
            .map_err(|e| CacheError::io("Failed to spawn completion thread", &e))?;

        if !affinity.designate(thread.thread().id()) {
            warn!("UI context was already designated; completion thread not marked");
        }

        Ok(Self {
            poster: CompletionPoster { tx, sink },
            thread,
        })
    }

    /// Returns a handle for posting results.
    #[must_use]
    pub fn poster(&self) -> CompletionPoster {
        self.poster.clone()
    }

    /// Identity of the completion thread.
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread.thread().id()
    }

    /// Stops accepting results and waits for the thread to drain.
    ///
    /// Blocks until every outstanding [`CompletionPoster`] is dropped.
    pub fn shutdown(self) {
        drop(self.poster);
        if self.thread.join().is_err() {
            warn!("Completion thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::domain::ports::ExecutionContext;
    use crate::infrastructure::image::test_support::RecordingSink;

    #[test]
    fn test_posted_results_arrive_in_order_on_named_thread() {
        let (sink, mut rx) = RecordingSink::new();
        let affinity = ThreadAffinity::new();
        let queue = CompletionQueue::start(sink, &affinity).expect("start");

        let poster = queue.poster();
        for i in 0..5 {
            assert!(poster.post(TargetId(i), None));
        }
        drop(poster);
        queue.shutdown();

        for i in 0..5 {
            let delivery = rx.try_recv().expect("delivery");
            assert_eq!(delivery.target, TargetId(i));
            assert!(delivery.image.is_none());
            assert_eq!(delivery.thread_name.as_deref(), Some(COMPLETION_THREAD_NAME));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_completion_thread_is_ui_affine() {
        let (sink, _rx) = RecordingSink::new();
        let affinity = ThreadAffinity::new();
        let queue = CompletionQueue::start(sink, &affinity).expect("start");

        assert_eq!(affinity.ui_thread(), Some(queue.thread_id()));
        assert!(!affinity.is_ui_affine());
        queue.shutdown();
    }

    #[test]
    fn test_inline_delivery_runs_on_caller() {
        let (sink, mut rx) = RecordingSink::new();
        let affinity = ThreadAffinity::new();
        let queue = CompletionQueue::start(sink, &affinity).expect("start");

        queue
            .poster()
            .deliver_inline(TargetId(9), Arc::new(DynamicImage::new_rgb8(2, 2)));

        let delivery = rx.try_recv().expect("delivered before returning");
        assert_eq!(delivery.target, TargetId(9));
        assert_eq!(
            delivery.thread_name.as_deref(),
            std::thread::current().name()
        );
        queue.shutdown();
    }

    struct OverlapSink {
        inside: AtomicBool,
        overlaps: AtomicUsize,
        deliveries: AtomicUsize,
    }

    impl CompletionSink for OverlapSink {
        fn deliver(&self, _target: TargetId, _image: Option<Arc<DynamicImage>>) {
            if self.inside.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(5));
            self.inside.store(false, Ordering::SeqCst);
            self.deliveries.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_inline_and_queued_deliveries_never_overlap() {
        let sink = Arc::new(OverlapSink {
            inside: AtomicBool::new(false),
            overlaps: AtomicUsize::new(0),
            deliveries: AtomicUsize::new(0),
        });
        let affinity = ThreadAffinity::new();
        let queue = CompletionQueue::start(sink.clone(), &affinity).expect("start");

        let poster = queue.poster();
        for i in 0..10 {
            assert!(poster.post(TargetId(i), None));
        }
        let inline = std::thread::spawn(move || {
            for i in 10..20 {
                poster.deliver_inline(TargetId(i), Arc::new(DynamicImage::new_rgb8(1, 1)));
            }
        });
        inline.join().expect("inline thread");
        queue.shutdown();

        assert_eq!(sink.deliveries.load(Ordering::SeqCst), 20);
        assert_eq!(sink.overlaps.load(Ordering::SeqCst), 0);
    }
}
