//! Codec adapter backed by the `image` crate.

use std::io::Cursor;

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ImageCodec;

/// Decodes PNG, JPEG and WebP through the `image` crate.
///
/// The crate cannot sub-sample while decoding, so a factor above 1 decodes
/// at full size and then shrinks with a fast box filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn probe_dimensions(&self, bytes: &[u8]) -> CacheResult<(u32, u32)> {
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| CacheError::DecodeError(format!("Failed to read header: {e}")))?
            .into_dimensions()
            .map_err(|e| CacheError::DecodeError(format!("Failed to probe dimensions: {e}")))
    }

    fn decode(&self, bytes: &[u8], sample_factor: u32) -> CacheResult<image::DynamicImage> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| CacheError::DecodeError(format!("Failed to decode image: {e}")))?;

        if sample_factor <= 1 {
            return Ok(img);
        }

        let width = (img.width() / sample_factor).max(1);
        let height = (img.height() / sample_factor).max(1);
        Ok(img.thumbnail_exact(width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::image::test_support::png_bytes;

    #[test]
    fn test_probe_reads_header() {
        let codec = ImageCrateCodec;
        assert_eq!(codec.probe_dimensions(&png_bytes(40, 30)).ok(), Some((40, 30)));
    }

    #[test]
    fn test_decode_with_factor_shrinks() {
        let codec = ImageCrateCodec;
        let img = codec.decode(&png_bytes(40, 30), 4).expect("decodes");
        assert_eq!((img.width(), img.height()), (10, 7));

        let full = codec.decode(&png_bytes(40, 30), 1).expect("decodes");
        assert_eq!((full.width(), full.height()), (40, 30));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let codec = ImageCrateCodec;
        assert!(matches!(
            codec.decode(b"not an image", 1),
            Err(CacheError::DecodeError(_))
        ));
        assert!(codec.probe_dimensions(b"not an image").is_err());
    }
}
