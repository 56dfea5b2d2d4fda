//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, DecodeBudget, ImageSource, LoadRequest, LoadedImage, TargetId};
pub use errors::{CacheError, CacheResult, LoaderError};
pub use ports::{ByteStream, CompletionSink, ExecutionContext, ImageCodec, ImageFetcher};
