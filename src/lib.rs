//! imgcache - A tiered image loader.
//!
//! Resolves image URIs through an in-memory LRU cache, a journaled disk LRU
//! cache and the network, decoding with power-of-two sub-sampling.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, loaders and adapters.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imgcache";
