//! Error types for path resolution.

use bindgraph_store::StoreError;

/// Errors that can occur while resolving paths or searching the graph.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// A bind name failed validation.
    #[error("invalid bind name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A shortest-path search used up its round budget without an answer.
    #[error("shortest-path search gave up after {rounds} rounds")]
    SearchLimitExceeded {
        /// Rounds completed before giving up.
        rounds: usize,
    },

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias for path results.
pub type PathResult<T> = Result<T, PathError>;
