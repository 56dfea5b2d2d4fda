//! Domain error types.

mod cache_error;
mod loader_error;

pub use cache_error::{CacheError, CacheResult};
pub use loader_error::LoaderError;
