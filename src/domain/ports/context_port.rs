//! Port definition for querying the current execution context.

/// Reports whether the caller is running on the UI-affine context.
///
/// The loader refuses to block on network I/O from that context.
pub trait ExecutionContext: Send + Sync {
    /// Returns true if the current thread is the UI-affine one.
    fn is_ui_affine(&self) -> bool;
}
