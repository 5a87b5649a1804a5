//! The bind graph of a hierarchical resource repository.
//!
//! Resources can have many names in many collections, like hard links in a
//! filesystem. This crate maintains that many-parent graph, resolves paths
//! against it, and reclaims resources that lose their last route from the
//! root.
//!
//! # Layers
//!
//! - [`bindgraph_types`]: identifiers, timestamps, bind records
//! - [`bindgraph_store`]: the `binds` and `cleanup` tables, in memory or in
//!   SQLite
//! - [`bindgraph_path`]: path walks and shortest-path search
//! - this crate: [`BindGraph`], the validated mutation surface, and
//!   [`Sweeper`], which drains the cleanup queue
//!
//! # Example
//!
//! ```
//! use bindgraph::{BindGraph, NoopLifecycle, ShortestPath};
//! use bindgraph_store::InMemoryBindStore;
//! use bindgraph_types::ResourceId;
//!
//! let graph = BindGraph::new(InMemoryBindStore::new());
//! let (docs, report) = (ResourceId::new(3), ResourceId::new(4));
//! graph.bind_resource(ResourceId::ROOT, docs, "docs").unwrap();
//! graph.bind_resource(docs, report, "report.pdf").unwrap();
//!
//! // A second name for the same resource.
//! graph.bind_resource(ResourceId::ROOT, report, "latest.pdf").unwrap();
//! assert_eq!(graph.parent_set(report).unwrap().len(), 2);
//!
//! // Dropping the collection orphans nothing reachable another way.
//! graph.unbind_resource(ResourceId::ROOT, docs, "docs").unwrap();
//! let swept = graph.sweeper(&NoopLifecycle).drain(16).unwrap();
//! assert_eq!(swept.deleted, 1);
//! assert_eq!(
//!     graph.canonical_path(report).unwrap(),
//!     ShortestPath::Found("/latest.pdf".into())
//! );
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod sweep;

pub use config::{GraphConfig, SqliteConfig};
pub use error::{GraphError, GraphResult};
pub use graph::{BindGraph, Rebound};
pub use lifecycle::{LifecycleError, NoopLifecycle, ResourceLifecycle};
pub use sweep::{SweepOutcome, SweepReport, Sweeper};

pub use bindgraph_path::{PathStep, ShortestPath};
