//! Loader misuse errors.

use thiserror::Error;

/// Errors surfaced to loader callers.
///
/// Only programming mistakes end up here; I/O, network and decode failures
/// come back as an absent image instead.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum LoaderError {
    #[error("blocking network fetch of {uri} requested from the UI context")]
    BlockingOnUiContext { uri: String },

    #[error("loader runtime unavailable: {message}")]
    RuntimeUnavailable { message: String },
}

impl LoaderError {
    /// Creates a UI-context violation for the given URI.
    #[must_use]
    pub fn ui_context(uri: impl Into<String>) -> Self {
        Self::BlockingOnUiContext { uri: uri.into() }
    }
}
