//! Fakes shared by the image pipeline tests.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::domain::entities::TargetId;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{ByteStream, CompletionSink, ImageFetcher};

/// Encodes a blank RGB image of the given size as PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    image::DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encode png");
    out
}

enum Behaviour {
    Serve(Vec<u8>),
    FailToConnect,
    FailMidStream(Vec<u8>),
}

/// Fetcher that serves canned bytes and counts calls.
pub struct FakeFetcher {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn serving(body: Vec<u8>) -> Self {
        Self {
            behaviour: Behaviour::Serve(body),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn png(width: u32, height: u32) -> Self {
        Self::serving(png_bytes(width, height))
    }

    pub fn failing() -> Self {
        Self {
            behaviour: Behaviour::FailToConnect,
            calls: AtomicUsize::new(0),
        }
    }

    /// Yields the first half of `body`, then an error.
    pub fn failing_mid_stream(body: Vec<u8>) -> Self {
        Self {
            behaviour: Behaviour::FailMidStream(body),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn halves(body: &[u8]) -> (Bytes, Bytes) {
    let mid = body.len() / 2;
    (
        Bytes::copy_from_slice(&body[..mid]),
        Bytes::copy_from_slice(&body[mid..]),
    )
}

#[async_trait::async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, uri: &str) -> CacheResult<ByteStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Serve(body) => {
                let (a, b) = halves(body);
                Ok(futures_util::stream::iter(vec![Ok(a), Ok(b)]).boxed())
            }
            Behaviour::FailToConnect => Err(CacheError::NetworkError(format!(
                "connection refused: {uri}"
            ))),
            Behaviour::FailMidStream(body) => {
                let (a, _) = halves(body);
                Ok(futures_util::stream::iter(vec![
                    Ok(a),
                    Err(CacheError::NetworkError("connection reset".to_string())),
                ])
                .boxed())
            }
        }
    }
}

/// A delivery observed by [`RecordingSink`].
#[derive(Debug)]
pub struct Delivery {
    pub target: TargetId,
    pub image: Option<Arc<image::DynamicImage>>,
    pub thread_name: Option<String>,
}

/// Sink that forwards every delivery to a channel.
pub struct RecordingSink {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl CompletionSink for RecordingSink {
    fn deliver(&self, target: TargetId, image: Option<Arc<image::DynamicImage>>) {
        let _ = self.tx.send(Delivery {
            target,
            image,
            thread_name: std::thread::current().name().map(String::from),
        });
    }
}
