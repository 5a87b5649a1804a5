//! Foundation types for the bind graph.
//!
//! The bind graph records *how* resources are reachable in a hierarchical
//! repository where one resource may have many names in many collections,
//! the way a filesystem allows hard links. Every other bindgraph crate
//! depends on `bindgraph-types`.
//!
//! # Key Types
//!
//! - [`ResourceId`]: Serial number of a resource in the backing store
//! - [`BindId`]: Identifier of one named edge in the bind graph
//! - [`Bind`]: A named, directed edge from a collection to a member
//! - [`CleanupRequest`]: A queued suspicion that a resource is orphaned
//! - [`Timestamp`]: Microsecond timestamp stamped on every mutation
//! - [`Clock`]: Timestamp source; [`SystemClock`] is strictly monotonic

pub mod bind;
pub mod clock;
pub mod error;
pub mod identity;
pub mod temporal;

pub use bind::{Bind, CleanupRequest, NewBind, ParentEdge};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::TypeError;
pub use identity::{BindId, CleanupId, ResourceId};
pub use temporal::Timestamp;
