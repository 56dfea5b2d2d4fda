//! Port definition for the image codec.

use crate::domain::errors::CacheResult;

/// Decodes encoded image bytes into rasters.
///
/// Calls are CPU bound; the loader runs them on the blocking pool.
#[cfg_attr(test, mockall::automock)]
pub trait ImageCodec: Send + Sync {
    /// Reads the true dimensions from the encoded header without decoding
    /// pixel data.
    fn probe_dimensions(&self, bytes: &[u8]) -> CacheResult<(u32, u32)>;

    /// Decodes the bytes, reducing each axis by `sample_factor`.
    /// A factor of 1 decodes at full resolution.
    fn decode(&self, bytes: &[u8], sample_factor: u32) -> CacheResult<image::DynamicImage>;
}
