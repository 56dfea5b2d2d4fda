//! Port definition for delivering asynchronous load results.

use std::sync::Arc;

use crate::domain::entities::TargetId;

/// Receives the final result of an asynchronous load.
///
/// Implementations must tolerate late deliveries for targets that were
/// recycled after the request was submitted.
#[cfg_attr(test, mockall::automock)]
pub trait CompletionSink: Send + Sync {
    /// Applies the image (or its absence) to the target.
    fn deliver(&self, target: TargetId, image: Option<Arc<image::DynamicImage>>);
}
