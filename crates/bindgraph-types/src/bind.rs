//! Bind records: the rows of the bind graph.
//!
//! A bind is a named, directed edge `collection -> resource`. The pair
//! `(collection, name)` is unique; a resource may be the target of any
//! number of binds. A resource with zero incoming binds is an orphan.

use serde::{Deserialize, Serialize};

use crate::identity::{BindId, CleanupId, ResourceId};
use crate::temporal::Timestamp;

/// A stored bind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bind {
    /// Edge identifier, assigned by the store.
    pub id: BindId,
    /// The parent collection.
    pub collection: ResourceId,
    /// The member resource.
    pub resource: ResourceId,
    /// Path segment naming `resource` inside `collection`.
    pub name: String,
    /// Stamp of the last insert or rebind of this row.
    pub updated_at: Timestamp,
}

impl Bind {
    /// Returns `true` for a collection bound to itself (the root's
    /// conceptual self-bind).
    pub fn is_self_bind(&self) -> bool {
        self.collection == self.resource
    }
}

/// A bind that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBind {
    pub collection: ResourceId,
    pub resource: ResourceId,
    pub name: String,
}

impl NewBind {
    pub fn new(collection: ResourceId, resource: ResourceId, name: impl Into<String>) -> Self {
        Self {
            collection,
            resource,
            name: name.into(),
        }
    }
}

/// One upward edge discovered while walking from a resource towards its
/// ancestors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentEdge {
    pub bind: BindId,
    /// The member end of the bind (a frontier resource).
    pub child: ResourceId,
    /// The collection end of the bind (a forefather candidate).
    pub parent: ResourceId,
    pub name: String,
}

impl From<&Bind> for ParentEdge {
    fn from(bind: &Bind) -> Self {
        Self {
            bind: bind.id,
            child: bind.resource,
            parent: bind.collection,
            name: bind.name.clone(),
        }
    }
}

/// A pending suspicion that a resource has no remaining binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRequest {
    pub id: CleanupId,
    pub resource: ResourceId,
}
