//! Port definition for fetching image bytes.

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::domain::errors::CacheResult;

/// Stream of body chunks produced by a fetch.
pub type ByteStream = BoxStream<'static, CacheResult<Bytes>>;

/// Fetches raw encoded bytes for a URI.
#[async_trait::async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Opens the resource and returns its body as a chunk stream.
    ///
    /// Failures can surface either here or as an `Err` item mid-stream.
    async fn fetch(&self, uri: &str) -> CacheResult<ByteStream>;
}
