use thiserror::Error;

use bindgraph_path::PathError;
use bindgraph_store::StoreError;
use bindgraph_types::ResourceId;

/// Errors surfaced by [`BindGraph`](crate::BindGraph) and the sweeper.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("invalid bind name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("bind batch is empty")]
    EmptyBatch,

    #[error("binding {resource} into {collection} would create a cycle")]
    CycleDetected {
        resource: ResourceId,
        collection: ResourceId,
    },

    #[error("failed to delete resource {resource}: {message}")]
    Lifecycle { resource: ResourceId, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("path error: {0}")]
    Path(PathError),
}

impl From<PathError> for GraphError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::InvalidName { name, reason } => Self::InvalidName { name, reason },
            PathError::Store(e) => Self::Store(e),
            other => Self::Path(other),
        }
    }
}

impl GraphError {
    /// HTTP-style status for the protocol layer.
    ///
    /// | error | status |
    /// |---|---|
    /// | duplicate name, cycle | 409 |
    /// | missing rebind source | 404 |
    /// | invalid name, empty batch | 400 |
    /// | anything else | 500 |
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Store(StoreError::DuplicateName { .. }) | Self::CycleDetected { .. } => 409,
            Self::Store(StoreError::BindNotFound { .. }) => 404,
            Self::InvalidName { .. } | Self::EmptyBatch => 400,
            _ => 500,
        }
    }

    /// Returns `true` if the caller must pick a different name or target;
    /// retrying the same request cannot succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::DuplicateName { .. }) | Self::CycleDetected { .. }
        )
    }
}

pub type GraphResult<T> = Result<T, GraphError>;
