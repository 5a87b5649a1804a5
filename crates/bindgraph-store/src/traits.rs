use std::collections::BTreeSet;

use bindgraph_types::{Bind, BindId, CleanupRequest, NewBind, ParentEdge, ResourceId, Timestamp};

use crate::error::{StoreError, StoreResult};

/// Persistent table of named edges `collection -> resource`.
///
/// All implementations must satisfy these invariants:
/// - `(collection, name)` is unique. A second insert under the same
///   coordinates fails with [`StoreError::DuplicateName`] and leaves the
///   first bind untouched.
/// - Bind ids increase in insertion order and are never reused.
/// - Every insert and rebind stamps `updated_at` from the store's clock.
/// - Not-found is a value (`None`, [`ResourceId::NONE`], `false`), never an
///   error.
pub trait BindStore {
    /// Insert one bind and return its id.
    fn insert(&self, bind: &NewBind) -> StoreResult<BindId>;

    /// Insert all binds with one shared timestamp, or none of them.
    ///
    /// An empty slice is a no-op.
    fn bulk_insert(&self, binds: &[NewBind]) -> StoreResult<Vec<BindId>>;

    /// Delete the bind at `(collection, name)` if it names `resource`.
    ///
    /// Returns `Ok(false)` if nothing matched; deleting twice is not an error.
    fn delete(&self, collection: ResourceId, resource: ResourceId, name: &str)
        -> StoreResult<bool>;

    /// The bind at `(collection, name)`, if any.
    fn lookup_by_name(&self, collection: ResourceId, name: &str) -> StoreResult<Option<Bind>>;

    /// The resource bound at `(collection, name)`, or [`ResourceId::NONE`].
    fn lookup_resource_id(&self, collection: ResourceId, name: &str) -> StoreResult<ResourceId> {
        Ok(self
            .lookup_by_name(collection, name)?
            .map(|bind| bind.resource)
            .unwrap_or(ResourceId::NONE))
    }

    /// All binds whose parent is `collection`, ordered by bind id.
    ///
    /// With `exclude_self`, a bind of the collection to itself is left out.
    fn list_children(&self, collection: ResourceId, exclude_self: bool) -> StoreResult<Vec<Bind>>;

    /// Move the bind at `(old_collection, old_name)` to
    /// `(new_collection, new_name)`, keeping its id and resource and
    /// restamping `updated_at`. Returns the updated bind.
    ///
    /// Fails with [`StoreError::BindNotFound`] if the source does not exist
    /// and with [`StoreError::DuplicateName`] if the destination is taken by
    /// another bind.
    fn rebind(
        &self,
        old_collection: ResourceId,
        old_name: &str,
        new_collection: ResourceId,
        new_name: &str,
    ) -> StoreResult<Bind>;

    /// One breadth-first round: every bind whose member is in `frontier`,
    /// minus the `excluded` bind ids, ordered by bind id.
    fn parents_of(
        &self,
        frontier: &[ResourceId],
        excluded: &BTreeSet<BindId>,
    ) -> StoreResult<Vec<ParentEdge>>;

    /// Every bind naming `resource`, ordered by bind id. Empty for orphans.
    fn parent_binds(&self, resource: ResourceId) -> StoreResult<Vec<Bind>>;

    /// Latest `updated_at` among the binds of `collection`'s members, or
    /// `floor` if that is later or the collection is empty.
    fn max_child_updated_at(
        &self,
        collection: ResourceId,
        floor: Timestamp,
    ) -> StoreResult<Timestamp>;
}

/// FIFO of resources suspected of being orphaned.
///
/// Delivery is at-most-once: [`pop_next`](CleanupQueue::pop_next) removes the
/// request in the same atomic step that reads it, so two concurrent sweepers
/// never receive the same request.
pub trait CleanupQueue {
    /// Append one request per id, in order. Duplicates are kept. Returns the
    /// number of requests added.
    fn enqueue(&self, resources: &[ResourceId]) -> StoreResult<usize>;

    /// Remove and return the oldest request, or `None` if the queue is empty.
    fn pop_next(&self) -> StoreResult<Option<ResourceId>>;

    /// Number of requests waiting.
    fn pending(&self) -> StoreResult<usize>;

    /// Up to `limit` waiting requests, oldest first, without removing them.
    fn list_pending(&self, limit: usize) -> StoreResult<Vec<CleanupRequest>>;
}

/// Everything reachable through a transaction handle.
pub trait BindTxn: BindStore + CleanupQueue {}

impl<T: BindStore + CleanupQueue + ?Sized> BindTxn for T {}

/// A backend able to run several bind and queue operations as one atomic
/// unit.
pub trait Transactional: BindStore + CleanupQueue + Send + Sync {
    /// Run `f` inside a transaction. `Ok` commits, `Err` rolls back every
    /// change made through the handle.
    ///
    /// The handle is the only way to reach the store while `f` runs; calling
    /// the store itself from inside `f` blocks.
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn BindTxn) -> Result<T, E>,
        E: From<StoreError>;
}
