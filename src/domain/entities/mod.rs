//! Domain entity definitions.

mod image;

pub use self::image::{CacheKey, DecodeBudget, ImageSource, LoadRequest, LoadedImage, TargetId};
