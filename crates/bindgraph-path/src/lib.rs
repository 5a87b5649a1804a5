//! Path resolution over the bind graph.
//!
//! A resource can be reachable through many collections under many names.
//! [`PathResolver`] answers the two questions the rest of the repository
//! asks about that graph:
//!
//! - *Downward*: which binds does the path `/a/b/c` traverse, and which
//!   resource does it name? ([`PathResolver::resolve_path`],
//!   [`PathResolver::lookup_uri`], [`PathResolver::find_bind_prefix`])
//! - *Upward*: what is the shortest path from an ancestor to a resource,
//!   optionally ignoring some binds? ([`PathResolver::shortest_path`],
//!   [`PathResolver::shortest_path_excluding`])
//!
//! The upward search never loads the graph. It asks the store for the
//! parents of the whole frontier once per breadth-first round.

pub mod error;
pub mod names;
pub mod resolver;

pub use error::{PathError, PathResult};
pub use names::{join_segments, segments, validate_bind_name};
pub use resolver::{PathResolver, PathStep, ShortestPath};
