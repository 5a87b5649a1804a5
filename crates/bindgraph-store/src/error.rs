use bindgraph_types::ResourceId;

/// Errors from bind store and cleanup queue operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The collection already has a member with this name.
    #[error("collection {collection} already has a member named {name:?}")]
    DuplicateName { collection: ResourceId, name: String },

    /// No bind exists at the given coordinates.
    #[error("no bind named {name:?} in collection {collection}")]
    BindNotFound { collection: ResourceId, name: String },

    /// Failure reported by the SQLite backend.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O failure while opening or preparing the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A lock guarding in-process state was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Returns `true` for caller-level conflicts (duplicate names, missing
    /// rebind sources) as opposed to backend failures.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::DuplicateName { .. } | Self::BindNotFound { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
