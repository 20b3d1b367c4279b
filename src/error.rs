//! Error types for ambit.

use thiserror::Error;

/// Errors that can occur during index operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MTreeError {
    /// A caller-supplied argument is outside the operation's domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal consistency check failed.
    ///
    /// Only produced by [`MTree::check_invariants`](crate::MTree::check_invariants);
    /// seeing this outside a diagnostic run indicates a bug in the tree, not a
    /// caller error.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Result type alias for ambit operations.
pub type Result<T> = std::result::Result<T, MTreeError>;
