//! Thread-identity execution context.

use std::sync::OnceLock;
use std::thread::ThreadId;

use tracing::debug;

use crate::domain::ports::ExecutionContext;

/// Marks one thread as UI-affine and recognises it later.
///
/// Until a thread is designated, no caller counts as UI-affine.
#[derive(Debug, Default)]
pub struct ThreadAffinity {
    ui_thread: OnceLock<ThreadId>,
}

impl ThreadAffinity {
    /// Creates a context with no UI thread designated yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ui_thread: OnceLock::new(),
        }
    }

    /// Designates `thread` as the UI-affine thread.
    ///
    /// Returns false if a different thread was designated earlier.
    pub fn designate(&self, thread: ThreadId) -> bool {
        let designated = *self.ui_thread.get_or_init(|| thread) == thread;
        if designated {
            debug!(?thread, "Designated UI-affine thread");
        }
        designated
    }

    /// Designates the calling thread.
    pub fn designate_current(&self) -> bool {
        self.designate(std::thread::current().id())
    }

    /// Returns the designated thread, if any.
    #[must_use]
    pub fn ui_thread(&self) -> Option<ThreadId> {
        self.ui_thread.get().copied()
    }
}

impl ExecutionContext for ThreadAffinity {
    fn is_ui_affine(&self) -> bool {
        self.ui_thread
            .get()
            .is_some_and(|id| *id == std::thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undesignated_is_never_ui() {
        let ctx = ThreadAffinity::new();
        assert!(!ctx.is_ui_affine());
        assert!(ctx.ui_thread().is_none());
    }

    #[test]
    fn test_designated_thread_only() {
        let ctx = std::sync::Arc::new(ThreadAffinity::new());
        assert!(ctx.designate_current());
        assert!(ctx.is_ui_affine());

        let other = ctx.clone();
        let on_other = std::thread::spawn(move || other.is_ui_affine())
            .join()
            .expect("thread");
        assert!(!on_other);
    }

    #[test]
    fn test_cannot_redesignate() {
        let ctx = std::sync::Arc::new(ThreadAffinity::new());
        assert!(ctx.designate_current());

        let other = ctx.clone();
        let redesignated = std::thread::spawn(move || other.designate_current())
            .join()
            .expect("thread");
        assert!(!redesignated);
        assert!(ctx.is_ui_affine());
    }
}
