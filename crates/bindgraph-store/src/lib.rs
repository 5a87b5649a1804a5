//! Storage for the bind graph.
//!
//! Two tables hold the whole graph: `binds`, the named edges from
//! collections to their members, and `cleanup`, a FIFO of resources that may
//! have lost their last bind. The [`BindStore`] and [`CleanupQueue`] traits
//! define the operations; [`Transactional`] lets callers group several of
//! them into one atomic unit.
//!
//! # Backends
//!
//! - [`InMemoryBindStore`]: ordered maps behind a lock, for tests and
//!   embedding.
//! - [`SqliteBindStore`]: a SQLite file that several processes may share.
//!
//! Both enforce the same constraints: `(collection, name)` is unique, bind
//! ids grow monotonically, and every mutation is stamped by a [`Clock`]
//! that never repeats.
//!
//! [`Clock`]: bindgraph_types::Clock

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

#[cfg(test)]
mod contract;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryBindStore, MemoryTxn};
pub use sqlite::{SqliteBindStore, SqliteTxn, DEFAULT_BUSY_TIMEOUT};
pub use traits::{BindStore, BindTxn, CleanupQueue, Transactional};
