//! The mutation surface of the bind graph.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use bindgraph_path::{validate_bind_name, PathResolver, PathStep, ShortestPath};
use bindgraph_store::{BindStore, BindTxn, CleanupQueue, StoreError, Transactional};
use bindgraph_types::{Bind, BindId, CleanupRequest, NewBind, ResourceId, Timestamp};

use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult};
use crate::lifecycle::{NoopLifecycle, ResourceLifecycle};
use crate::sweep::Sweeper;

/// Result of [`BindGraph::rebind_replacing`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rebound {
    /// The moved bind, at its new coordinates.
    pub bind: Bind,
    /// The bind that previously occupied the destination, now deleted.
    pub displaced: Option<Bind>,
}

/// What [`BindGraph::reclaim_if_orphaned`] did with one resource.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Reclaimed {
    /// Still reachable from the root, or the root itself.
    Kept,
    /// Unbound and handed to the lifecycle; these were its members.
    Deleted(Vec<ResourceId>),
}

/// Bind graph over a transactional store.
///
/// This is the only sanctioned way to mutate the graph. Every mutation
/// validates its names, stamps a fresh `updated_at`, and deals with any
/// resource it may have orphaned in the same transaction: queued for the
/// sweeper when `deferred_cleanup` is on, reclaimed on the spot through the
/// graph's [`ResourceLifecycle`] otherwise.
///
/// # Example
///
/// ```
/// use bindgraph::{BindGraph, ShortestPath};
/// use bindgraph_store::InMemoryBindStore;
/// use bindgraph_types::ResourceId;
///
/// let graph = BindGraph::new(InMemoryBindStore::new());
/// let docs = ResourceId::new(3);
/// let report = ResourceId::new(4);
/// graph.bind_resource(ResourceId::ROOT, docs, "docs").unwrap();
/// graph.bind_resource(docs, report, "report.pdf").unwrap();
///
/// assert_eq!(graph.resolve_resource("/docs/report.pdf").unwrap(), report);
/// assert_eq!(
///     graph.canonical_path(report).unwrap(),
///     ShortestPath::Found("/docs/report.pdf".into())
/// );
/// ```
pub struct BindGraph<S> {
    store: S,
    config: GraphConfig,
    lifecycle: Arc<dyn ResourceLifecycle>,
}

impl<S: Transactional> BindGraph<S> {
    /// Wrap `store` with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, GraphConfig::default())
    }

    pub fn with_config(store: S, config: GraphConfig) -> Self {
        Self {
            store,
            config,
            lifecycle: Arc::new(NoopLifecycle),
        }
    }

    /// Use `lifecycle` for resources reclaimed by a mutation itself, when
    /// cleanup is not deferred to a sweeper.
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn ResourceLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn root(&self) -> ResourceId {
        self.config.root_collection
    }

    /// A resolver over the store, rooted and capped per the configuration.
    pub fn resolver(&self) -> PathResolver<'_, S> {
        self.resolver_over(&self.store)
    }

    pub(crate) fn resolver_over<'a, T: BindStore + ?Sized>(&self, store: &'a T) -> PathResolver<'a, T> {
        PathResolver::new(store)
            .with_root(self.config.root_collection)
            .with_max_rounds(self.config.max_search_rounds)
    }

    /// A sweeper draining this graph's cleanup queue into `lifecycle`.
    pub fn sweeper<'g, L: ResourceLifecycle + ?Sized>(&'g self, lifecycle: &'g L) -> Sweeper<'g, S, L> {
        Sweeper::new(self, lifecycle)
    }

    // ---- Mutations ----

    /// Name `resource` as `name` inside `collection`.
    ///
    /// Both endpoints are assumed to exist. Fails with `DuplicateName` if the
    /// collection already has a member called `name`.
    pub fn bind_resource(
        &self,
        collection: ResourceId,
        resource: ResourceId,
        name: &str,
    ) -> GraphResult<BindId> {
        validate_bind_name(name)?;
        let bind = NewBind::new(collection, resource, name);

        let id = if self.config.reject_cycles {
            self.store.transaction(|txn| {
                self.check_cycle(txn, resource, collection)?;
                Ok::<_, GraphError>(txn.insert(&bind)?)
            })?
        } else {
            self.store.insert(&bind)?
        };

        info!(bind = %id, %collection, %resource, name, "bound resource");
        Ok(id)
    }

    /// Remove the bind `(collection, name) -> resource` and release
    /// `resource`, atomically.
    ///
    /// Returns whether a bind was removed. The resource is released either
    /// way: with deferred cleanup it is queued and the sweeper re-verifies it
    /// later; otherwise it, and every member it strands, is deleted now if
    /// unreachable. A lifecycle error then undoes the whole unbind.
    pub fn unbind_resource(
        &self,
        collection: ResourceId,
        resource: ResourceId,
        name: &str,
    ) -> GraphResult<bool> {
        let removed = self.store.transaction(|txn| {
            let removed = txn.delete(collection, resource, name)?;
            self.release(txn, resource)?;
            Ok::<_, GraphError>(removed)
        })?;

        info!(%collection, %resource, name, removed, "unbound resource");
        Ok(removed)
    }

    /// Move or rename the bind at `(src, src_name)` to `(dst, dst_name)`.
    ///
    /// The bind keeps its id and resource and gets a fresh `updated_at`.
    /// Fails with `BindNotFound` if the source is missing and with
    /// `DuplicateName` if the destination is taken.
    pub fn rebind_resource(
        &self,
        src: ResourceId,
        src_name: &str,
        dst: ResourceId,
        dst_name: &str,
    ) -> GraphResult<Bind> {
        validate_bind_name(dst_name)?;

        let bind = if self.config.reject_cycles {
            self.store.transaction(|txn| {
                let source = Self::source_bind(txn, src, src_name)?;
                self.check_cycle(txn, source.resource, dst)?;
                Ok::<_, GraphError>(txn.rebind(src, src_name, dst, dst_name)?)
            })?
        } else {
            self.store.rebind(src, src_name, dst, dst_name)?
        };

        info!(bind = %bind.id, %src, src_name, %dst, dst_name, "rebound resource");
        Ok(bind)
    }

    /// Like [`rebind_resource`](Self::rebind_resource), but an existing bind at
    /// the destination is deleted first and its resource released as by
    /// [`unbind_resource`](Self::unbind_resource).
    pub fn rebind_replacing(
        &self,
        src: ResourceId,
        src_name: &str,
        dst: ResourceId,
        dst_name: &str,
    ) -> GraphResult<Rebound> {
        validate_bind_name(dst_name)?;

        let rebound = self.store.transaction(|txn| {
            let source = Self::source_bind(txn, src, src_name)?;
            if self.config.reject_cycles {
                self.check_cycle(txn, source.resource, dst)?;
            }

            let displaced = txn
                .lookup_by_name(dst, dst_name)?
                .filter(|existing| existing.id != source.id);
            if let Some(old) = &displaced {
                txn.delete(old.collection, old.resource, &old.name)?;
            }

            let bind = txn.rebind(src, src_name, dst, dst_name)?;

            if let Some(old) = &displaced {
                self.release(txn, old.resource)?;
            }
            Ok::<_, GraphError>(Rebound { bind, displaced })
        })?;

        info!(
            bind = %rebound.bind.id,
            %src,
            src_name,
            %dst,
            dst_name,
            displaced = ?rebound.displaced.as_ref().map(|b| b.resource),
            "rebound resource"
        );
        Ok(rebound)
    }

    /// Create several binds as one event: one shared timestamp, all or none.
    pub fn bulk_bind(&self, binds: &[NewBind]) -> GraphResult<Vec<BindId>> {
        if binds.is_empty() {
            return Err(GraphError::EmptyBatch);
        }
        for bind in binds {
            validate_bind_name(&bind.name)?;
        }

        let ids = if self.config.reject_cycles {
            self.store.transaction(|txn| {
                for bind in binds {
                    self.check_cycle(txn, bind.resource, bind.collection)?;
                }
                Ok::<_, GraphError>(txn.bulk_insert(binds)?)
            })?
        } else {
            self.store.bulk_insert(binds)?
        };

        info!(count = ids.len(), "bound resource batch");
        Ok(ids)
    }

    // ---- Cleanup queue ----

    /// Queue resources for an orphan check.
    pub fn enqueue(&self, resources: &[ResourceId]) -> GraphResult<usize> {
        let queued = self.store.enqueue(resources)?;
        debug!(queued, "queued cleanup requests");
        Ok(queued)
    }

    /// Take the oldest cleanup request.
    pub fn pop_next(&self) -> GraphResult<Option<ResourceId>> {
        Ok(self.store.pop_next()?)
    }

    pub fn pending_cleanups(&self) -> GraphResult<usize> {
        Ok(self.store.pending()?)
    }

    /// Up to `limit` waiting cleanup requests, oldest first, left queued.
    pub fn pending_requests(&self, limit: usize) -> GraphResult<Vec<CleanupRequest>> {
        Ok(self.store.list_pending(limit)?)
    }

    // ---- Queries ----

    pub fn lookup(&self, collection: ResourceId, name: &str) -> GraphResult<Option<Bind>> {
        Ok(self.store.lookup_by_name(collection, name)?)
    }

    /// The resource at `(collection, name)`, or [`ResourceId::NONE`].
    pub fn lookup_resource_id(&self, collection: ResourceId, name: &str) -> GraphResult<ResourceId> {
        Ok(self.store.lookup_resource_id(collection, name)?)
    }

    /// Members of `collection`, ordered by bind id.
    pub fn list_children(&self, collection: ResourceId, exclude_self: bool) -> GraphResult<Vec<Bind>> {
        Ok(self.store.list_children(collection, exclude_self)?)
    }

    /// Every bind naming `resource`: the collections it is a member of.
    pub fn parent_set(&self, resource: ResourceId) -> GraphResult<Vec<Bind>> {
        Ok(self.store.parent_binds(resource)?)
    }

    /// Latest change among `collection`'s members, never earlier than
    /// `floor`.
    pub fn last_modified(&self, collection: ResourceId, floor: Timestamp) -> GraphResult<Timestamp> {
        Ok(self.store.max_child_updated_at(collection, floor)?)
    }

    pub fn resolve_path(&self, path: &str) -> GraphResult<Vec<PathStep>> {
        Ok(self.resolver().resolve_path(path)?)
    }

    pub fn resolve_resource(&self, path: &str) -> GraphResult<ResourceId> {
        Ok(self.resolver().resolve_resource(path)?)
    }

    pub fn lookup_uri(&self, path: &str) -> GraphResult<Option<Bind>> {
        Ok(self.resolver().lookup_uri(path)?)
    }

    pub fn find_bind_prefix(&self, bind: BindId, path: &str) -> GraphResult<String> {
        Ok(self.resolver().find_bind_prefix(bind, path)?)
    }

    pub fn shortest_path(&self, from: ResourceId, to: ResourceId) -> GraphResult<ShortestPath> {
        Ok(self.resolver().shortest_path(from, to)?)
    }

    pub fn shortest_path_excluding(
        &self,
        from: ResourceId,
        to: ResourceId,
        excluded: &BTreeSet<BindId>,
    ) -> GraphResult<ShortestPath> {
        Ok(self.resolver().shortest_path_excluding(from, to, excluded)?)
    }

    pub fn is_reachable(
        &self,
        from: ResourceId,
        to: ResourceId,
        excluded: &BTreeSet<BindId>,
    ) -> GraphResult<bool> {
        Ok(self.resolver().is_reachable(from, to, excluded)?)
    }

    /// Shortest path from the root to `resource`: the href to render for it.
    pub fn canonical_path(&self, resource: ResourceId) -> GraphResult<ShortestPath> {
        self.shortest_path(self.root(), resource)
    }

    // ---- Reclamation ----

    /// Delete `resource` if no chain of binds leads to it from the root.
    ///
    /// Its member binds and any binds still naming it (from an unreachable
    /// cycle) are removed before `lifecycle` is called. The root is always
    /// kept.
    pub(crate) fn reclaim_if_orphaned<T, L>(
        &self,
        txn: &T,
        resource: ResourceId,
        lifecycle: &L,
    ) -> GraphResult<Reclaimed>
    where
        T: BindStore + ?Sized,
        L: ResourceLifecycle + ?Sized,
    {
        let root = self.root();
        if resource == root
            || self
                .resolver_over(txn)
                .shortest_path(root, resource)?
                .is_reachable()
        {
            return Ok(Reclaimed::Kept);
        }

        let members = txn.list_children(resource, true)?;
        for member in &members {
            txn.delete(resource, member.resource, &member.name)?;
        }
        for parent in txn.parent_binds(resource)? {
            txn.delete(parent.collection, resource, &parent.name)?;
        }

        lifecycle
            .delete_resource(resource)
            .map_err(|e| GraphError::Lifecycle {
                resource,
                message: e.to_string(),
            })?;
        Ok(Reclaimed::Deleted(
            members.into_iter().map(|m| m.resource).collect(),
        ))
    }

    /// Queue `resource` for the sweeper, or reclaim it and whatever it
    /// strands right away.
    fn release<T: BindTxn + ?Sized>(&self, txn: &T, resource: ResourceId) -> GraphResult<()> {
        if self.config.deferred_cleanup {
            txn.enqueue(&[resource])?;
            return Ok(());
        }

        let mut seen = BTreeSet::from([resource]);
        let mut pending = VecDeque::from([resource]);
        while let Some(next) = pending.pop_front() {
            if let Reclaimed::Deleted(members) =
                self.reclaim_if_orphaned(txn, next, &*self.lifecycle)?
            {
                info!(resource = %next, members = members.len(), "reclaimed orphaned resource");
                pending.extend(members.into_iter().filter(|m| seen.insert(*m)));
            }
        }
        Ok(())
    }

    // ---- Helpers ----

    fn source_bind<T: BindStore + ?Sized>(store: &T, src: ResourceId, src_name: &str) -> GraphResult<Bind> {
        store
            .lookup_by_name(src, src_name)?
            .ok_or_else(|| {
                GraphError::Store(StoreError::BindNotFound {
                    collection: src,
                    name: src_name.to_string(),
                })
            })
    }

    /// Fails if `collection` is `resource` itself or lies beneath it.
    fn check_cycle<T: BindStore + ?Sized>(
        &self,
        store: &T,
        resource: ResourceId,
        collection: ResourceId,
    ) -> GraphResult<()> {
        let below = resource == collection
            || self
                .resolver_over(store)
                .is_reachable(resource, collection, &BTreeSet::new())?;
        if below {
            debug!(%resource, %collection, "rejected cyclic bind");
            return Err(GraphError::CycleDetected { resource, collection });
        }
        Ok(())
    }
}

impl<S> std::fmt::Debug for BindGraph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindGraph")
            .field("root", &self.config.root_collection)
            .field("reject_cycles", &self.config.reject_cycles)
            .field("deferred_cleanup", &self.config.deferred_cleanup)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindgraph_store::{InMemoryBindStore, SqliteBindStore};
    use bindgraph_types::ManualClock;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn r(id: i64) -> ResourceId {
        ResourceId::new(id)
    }

    fn graph() -> BindGraph<InMemoryBindStore> {
        BindGraph::new(InMemoryBindStore::new())
    }

    fn strict_graph() -> BindGraph<InMemoryBindStore> {
        let config = GraphConfig {
            reject_cycles: true,
            ..GraphConfig::default()
        };
        BindGraph::with_config(InMemoryBindStore::new(), config)
    }

    /// root(2) -docs-> 3 -a-> 4 -b-> 5
    fn populate<S: Transactional>(graph: &BindGraph<S>) {
        graph.bind_resource(r(2), r(3), "docs").unwrap();
        graph.bind_resource(r(3), r(4), "a").unwrap();
        graph.bind_resource(r(4), r(5), "b").unwrap();
    }

    // --- bind_resource ---

    #[test]
    fn bind_and_resolve() {
        let graph = graph();
        populate(&graph);
        assert_eq!(graph.resolve_resource("/docs/a/b").unwrap(), r(5));
        assert_eq!(graph.lookup_resource_id(r(3), "a").unwrap(), r(4));
        assert_eq!(
            graph.canonical_path(r(5)).unwrap(),
            ShortestPath::Found("/docs/a/b".into())
        );
    }

    #[test]
    fn bind_rejects_invalid_names() {
        let graph = graph();
        for name in ["", ".", "..", "a/b"] {
            let err = graph.bind_resource(r(2), r(3), name).unwrap_err();
            assert!(matches!(err, GraphError::InvalidName { .. }), "{name:?}");
            assert_eq!(err.status_code(), 400);
        }
        assert!(graph.list_children(r(2), false).unwrap().is_empty());
    }

    #[test]
    fn bind_duplicate_is_conflict() {
        let graph = graph();
        graph.bind_resource(r(2), r(3), "x").unwrap();
        let err = graph.bind_resource(r(2), r(4), "x").unwrap_err();
        assert!(matches!(err, GraphError::Store(StoreError::DuplicateName { .. })));
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn second_name_for_same_resource() {
        let graph = graph();
        populate(&graph);
        graph.bind_resource(r(2), r(5), "shortcut").unwrap();
        let parents = graph.parent_set(r(5)).unwrap();
        assert_eq!(parents.len(), 2);
        assert_eq!(
            graph.canonical_path(r(5)).unwrap(),
            ShortestPath::Found("/shortcut".into())
        );
    }

    // --- unbind_resource ---

    #[test]
    fn unbind_enqueues_resource() {
        let graph = graph();
        populate(&graph);
        assert!(graph.unbind_resource(r(4), r(5), "b").unwrap());
        assert!(graph.lookup(r(4), "b").unwrap().is_none());
        assert_eq!(graph.pop_next().unwrap(), Some(r(5)));
        assert_eq!(graph.pop_next().unwrap(), None);
    }

    #[test]
    fn unbind_missing_still_enqueues() {
        let graph = graph();
        assert!(!graph.unbind_resource(r(2), r(9), "ghost").unwrap());
        assert_eq!(graph.pending_cleanups().unwrap(), 1);
    }

    #[test]
    fn pending_requests_lists_without_popping() {
        let graph = graph();
        populate(&graph);
        graph.unbind_resource(r(4), r(5), "b").unwrap();
        graph.unbind_resource(r(3), r(4), "a").unwrap();

        let pending = graph.pending_requests(10).unwrap();
        let resources: Vec<_> = pending.iter().map(|req| req.resource).collect();
        assert_eq!(resources, vec![r(5), r(4)]);
        assert_eq!(graph.pending_requests(1).unwrap().len(), 1);
        assert_eq!(graph.pending_cleanups().unwrap(), 2);
    }

    // --- immediate cleanup ---

    #[derive(Default)]
    struct Released {
        deleted: std::sync::Mutex<Vec<ResourceId>>,
        refuse: Option<ResourceId>,
    }

    impl ResourceLifecycle for Released {
        fn delete_resource(
            &self,
            resource: ResourceId,
        ) -> Result<(), crate::lifecycle::LifecycleError> {
            if self.refuse == Some(resource) {
                return Err("busy".into());
            }
            self.deleted.lock().unwrap().push(resource);
            Ok(())
        }
    }

    fn immediate_graph(lifecycle: Arc<Released>) -> BindGraph<InMemoryBindStore> {
        let config = GraphConfig {
            deferred_cleanup: false,
            ..GraphConfig::default()
        };
        BindGraph::with_config(InMemoryBindStore::new(), config).with_lifecycle(lifecycle)
    }

    #[test]
    fn immediate_unbind_deletes_subtree() {
        let released = Arc::new(Released::default());
        let graph = immediate_graph(released.clone());
        populate(&graph);

        assert!(graph.unbind_resource(r(2), r(3), "docs").unwrap());
        assert_eq!(*released.deleted.lock().unwrap(), vec![r(3), r(4), r(5)]);
        assert!(graph.list_children(r(3), false).unwrap().is_empty());
        assert!(graph.list_children(r(4), false).unwrap().is_empty());
        assert_eq!(graph.pending_cleanups().unwrap(), 0);
    }

    #[test]
    fn immediate_unbind_keeps_shared_member() {
        let released = Arc::new(Released::default());
        let graph = immediate_graph(released.clone());
        populate(&graph);
        graph.bind_resource(r(2), r(5), "shortcut").unwrap();

        graph.unbind_resource(r(2), r(3), "docs").unwrap();
        assert_eq!(*released.deleted.lock().unwrap(), vec![r(3), r(4)]);
        assert_eq!(graph.resolve_resource("/shortcut").unwrap(), r(5));
        assert_eq!(graph.parent_set(r(5)).unwrap().len(), 1);
    }

    #[test]
    fn immediate_unbind_of_reachable_resource_deletes_nothing() {
        let released = Arc::new(Released::default());
        let graph = immediate_graph(released.clone());
        populate(&graph);
        graph.bind_resource(r(2), r(4), "alias").unwrap();

        graph.unbind_resource(r(3), r(4), "a").unwrap();
        assert!(released.deleted.lock().unwrap().is_empty());
        assert_eq!(graph.resolve_resource("/alias/b").unwrap(), r(5));
    }

    #[test]
    fn immediate_unbind_rolls_back_on_lifecycle_error() {
        let released = Arc::new(Released {
            refuse: Some(r(4)),
            ..Released::default()
        });
        let graph = immediate_graph(released.clone());
        populate(&graph);

        let err = graph.unbind_resource(r(2), r(3), "docs").unwrap_err();
        assert!(matches!(err, GraphError::Lifecycle { resource, .. } if resource == r(4)));
        assert_eq!(graph.resolve_resource("/docs/a/b").unwrap(), r(5));
        assert_eq!(graph.pending_cleanups().unwrap(), 0);
    }

    #[test]
    fn immediate_rebind_replacing_reclaims_displaced() {
        let released = Arc::new(Released::default());
        let graph = immediate_graph(released.clone());
        populate(&graph);
        graph.bind_resource(r(3), r(6), "taken").unwrap();
        graph.bind_resource(r(6), r(7), "inner").unwrap();

        graph.rebind_replacing(r(4), "b", r(3), "taken").unwrap();
        assert_eq!(*released.deleted.lock().unwrap(), vec![r(6), r(7)]);
        assert_eq!(graph.lookup_resource_id(r(3), "taken").unwrap(), r(5));
        assert_eq!(graph.pending_cleanups().unwrap(), 0);
    }

    #[test]
    fn deferred_and_immediate_agree_on_survivors() {
        let released = Arc::new(Released::default());
        let immediate = immediate_graph(released.clone());
        let deferred = graph();
        for g in [&immediate, &deferred] {
            populate(g);
            g.bind_resource(r(2), r(5), "shortcut").unwrap();
            g.unbind_resource(r(2), r(3), "docs").unwrap();
        }
        let swept = Released::default();
        deferred.sweeper(&swept).drain(100).unwrap();

        assert_eq!(
            *released.deleted.lock().unwrap(),
            *swept.deleted.lock().unwrap()
        );
        assert_eq!(
            immediate.canonical_path(r(5)).unwrap(),
            deferred.canonical_path(r(5)).unwrap()
        );
    }

    // --- rebind_resource ---

    #[test]
    fn rebind_moves_bind() {
        let graph = graph();
        populate(&graph);
        let before = graph.lookup(r(4), "b").unwrap().unwrap();
        let moved = graph.rebind_resource(r(4), "b", r(3), "b2").unwrap();
        assert_eq!(moved.id, before.id);
        assert!(moved.updated_at > before.updated_at);
        assert!(graph.lookup(r(4), "b").unwrap().is_none());
        assert_eq!(graph.resolve_resource("/docs/b2").unwrap(), r(5));
        assert_eq!(graph.pending_cleanups().unwrap(), 0);
    }

    #[test]
    fn rebind_missing_source_is_not_found() {
        let graph = graph();
        let err = graph.rebind_resource(r(2), "nope", r(2), "x").unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn rebind_onto_taken_name_is_conflict() {
        let graph = graph();
        populate(&graph);
        graph.bind_resource(r(3), r(6), "taken").unwrap();
        let err = graph.rebind_resource(r(4), "b", r(3), "taken").unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(graph.lookup_resource_id(r(4), "b").unwrap(), r(5));
    }

    #[test]
    fn rebind_rejects_invalid_destination_name() {
        let graph = graph();
        populate(&graph);
        let err = graph.rebind_resource(r(4), "b", r(3), "..").unwrap_err();
        assert!(matches!(err, GraphError::InvalidName { .. }));
    }

    // --- rebind_replacing ---

    #[test]
    fn rebind_replacing_displaces_destination() {
        let graph = graph();
        populate(&graph);
        graph.bind_resource(r(3), r(6), "taken").unwrap();

        let rebound = graph.rebind_replacing(r(4), "b", r(3), "taken").unwrap();
        assert_eq!(rebound.bind.resource, r(5));
        assert_eq!(rebound.displaced.as_ref().map(|b| b.resource), Some(r(6)));
        assert_eq!(graph.lookup_resource_id(r(3), "taken").unwrap(), r(5));
        assert_eq!(graph.pop_next().unwrap(), Some(r(6)));
    }

    #[test]
    fn rebind_replacing_free_destination() {
        let graph = graph();
        populate(&graph);
        let rebound = graph.rebind_replacing(r(4), "b", r(2), "top").unwrap();
        assert!(rebound.displaced.is_none());
        assert_eq!(graph.pending_cleanups().unwrap(), 0);
    }

    #[test]
    fn rebind_replacing_onto_itself_restamps() {
        let graph = graph();
        populate(&graph);
        let before = graph.lookup(r(4), "b").unwrap().unwrap();
        let rebound = graph.rebind_replacing(r(4), "b", r(4), "b").unwrap();
        assert!(rebound.displaced.is_none());
        assert!(rebound.bind.updated_at > before.updated_at);
    }

    #[test]
    fn rebind_replacing_missing_source_changes_nothing() {
        let graph = graph();
        populate(&graph);
        let err = graph.rebind_replacing(r(2), "nope", r(3), "a").unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(graph.lookup_resource_id(r(3), "a").unwrap(), r(4));
        assert_eq!(graph.pending_cleanups().unwrap(), 0);
    }

    // --- cycles ---

    #[test]
    fn permissive_by_default() {
        let graph = graph();
        populate(&graph);
        graph.rebind_resource(r(2), "docs", r(5), "loop").unwrap();
        assert_eq!(
            graph.canonical_path(r(5)).unwrap(),
            ShortestPath::Unreachable
        );
    }

    #[test]
    fn strict_rejects_move_under_descendant() {
        let graph = strict_graph();
        populate(&graph);
        let err = graph.rebind_resource(r(3), "a", r(5), "loop").unwrap_err();
        assert!(matches!(
            err,
            GraphError::CycleDetected { resource, collection } if resource == r(4) && collection == r(5)
        ));
        assert_eq!(err.status_code(), 409);
        assert_eq!(graph.lookup_resource_id(r(3), "a").unwrap(), r(4));
    }

    #[test]
    fn strict_rejects_bind_into_itself() {
        let graph = strict_graph();
        populate(&graph);
        assert!(matches!(
            graph.bind_resource(r(4), r(4), "me"),
            Err(GraphError::CycleDetected { .. })
        ));
        assert!(matches!(
            graph.bind_resource(r(5), r(3), "up"),
            Err(GraphError::CycleDetected { .. })
        ));
        assert!(matches!(
            graph.rebind_replacing(r(2), "docs", r(4), "again"),
            Err(GraphError::CycleDetected { .. })
        ));
        assert!(matches!(
            graph.bulk_bind(&[NewBind::new(r(2), r(7), "ok"), NewBind::new(r(5), r(4), "bad")]),
            Err(GraphError::CycleDetected { .. })
        ));
        assert!(graph.lookup(r(2), "ok").unwrap().is_none());
    }

    #[test]
    fn strict_allows_sideways_moves() {
        let graph = strict_graph();
        populate(&graph);
        graph.bind_resource(r(2), r(6), "other").unwrap();
        graph.rebind_resource(r(4), "b", r(6), "b").unwrap();
        graph.bind_resource(r(6), r(4), "a-again").unwrap();
        assert_eq!(graph.resolve_resource("/other/b").unwrap(), r(5));
    }

    // --- bulk_bind ---

    #[test]
    fn bulk_bind_shares_timestamp() {
        let clock = Arc::new(ManualClock::default());
        let graph = BindGraph::new(InMemoryBindStore::with_clock(clock));
        let ids = graph
            .bulk_bind(&[
                NewBind::new(r(2), r(3), "a"),
                NewBind::new(r(2), r(4), "b"),
                NewBind::new(r(3), r(5), "c"),
            ])
            .unwrap();
        assert_eq!(ids.len(), 3);
        let stamps: BTreeSet<_> = graph
            .list_children(r(2), false)
            .unwrap()
            .into_iter()
            .chain(graph.list_children(r(3), false).unwrap())
            .map(|b| b.updated_at)
            .collect();
        assert_eq!(stamps.len(), 1);
    }

    #[test]
    fn bulk_bind_rejects_empty() {
        assert!(matches!(graph().bulk_bind(&[]), Err(GraphError::EmptyBatch)));
    }

    #[test]
    fn bulk_bind_one_bad_entry_leaves_nothing() {
        let graph = graph();
        let batch = [
            NewBind::new(r(2), r(3), "a"),
            NewBind::new(r(2), r(4), "b"),
            NewBind::new(r(2), r(5), ""),
            NewBind::new(r(2), r(6), "d"),
            NewBind::new(r(2), r(7), "e"),
        ];
        assert!(graph.bulk_bind(&batch).is_err());
        assert!(graph.list_children(r(2), false).unwrap().is_empty());

        let duplicate = [
            NewBind::new(r(2), r(3), "a"),
            NewBind::new(r(2), r(4), "b"),
            NewBind::new(r(2), r(5), "a"),
            NewBind::new(r(2), r(6), "d"),
            NewBind::new(r(2), r(7), "e"),
        ];
        assert!(graph.bulk_bind(&duplicate).is_err());
        assert!(graph.list_children(r(2), false).unwrap().is_empty());
    }

    // --- queries ---

    #[test]
    fn last_modified_tracks_members() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_micros(100)));
        let graph = BindGraph::new(InMemoryBindStore::with_clock(clock.clone()));
        let floor = Timestamp::from_micros(50);
        assert_eq!(graph.last_modified(r(2), floor).unwrap(), floor);

        graph.bind_resource(r(2), r(3), "a").unwrap();
        clock.advance(1_000);
        graph.bind_resource(r(2), r(4), "b").unwrap();
        let latest = graph.lookup(r(2), "b").unwrap().unwrap().updated_at;
        assert_eq!(graph.last_modified(r(2), floor).unwrap(), latest);
    }

    #[test]
    fn find_bind_prefix_through_facade() {
        let graph = graph();
        populate(&graph);
        let a = graph.lookup(r(3), "a").unwrap().unwrap();
        assert_eq!(graph.find_bind_prefix(a.id, "/docs/a/b").unwrap(), "/docs/a");
        assert_eq!(graph.lookup_uri("/docs/a").unwrap(), Some(a));
    }

    #[test]
    fn exclusion_through_facade() {
        let graph = graph();
        populate(&graph);
        graph.bind_resource(r(2), r(4), "alt").unwrap();
        let a = graph.lookup(r(3), "a").unwrap().unwrap();
        let excluded = BTreeSet::from([a.id]);
        assert_eq!(
            graph.shortest_path_excluding(r(2), r(5), &excluded).unwrap(),
            ShortestPath::Found("/alt/b".into())
        );
        assert!(graph.is_reachable(r(3), r(5), &BTreeSet::new()).unwrap());
        assert!(!graph.is_reachable(r(3), r(5), &excluded).unwrap());
    }

    #[test]
    fn round_cap_from_config() {
        let config = GraphConfig {
            max_search_rounds: Some(1),
            ..GraphConfig::default()
        };
        let graph = BindGraph::with_config(InMemoryBindStore::new(), config);
        populate(&graph);
        let err = graph.canonical_path(r(5)).unwrap_err();
        assert!(matches!(err, GraphError::Path(_)));
    }

    #[test]
    fn custom_root() {
        let config = GraphConfig {
            root_collection: r(3),
            ..GraphConfig::default()
        };
        let graph = BindGraph::with_config(InMemoryBindStore::new(), config);
        populate(&graph);
        assert_eq!(graph.root(), r(3));
        assert_eq!(graph.resolve_resource("/a/b").unwrap(), r(5));
        assert_eq!(
            graph.canonical_path(r(5)).unwrap(),
            ShortestPath::Found("/a/b".into())
        );
    }

    #[test]
    fn sqlite_backed_graph() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteBindStore::open(dir.path().join("binds.db")).unwrap();
        let graph = BindGraph::new(store);
        populate(&graph);

        graph.rebind_replacing(r(4), "b", r(3), "a").unwrap();
        assert_eq!(graph.resolve_resource("/docs/a").unwrap(), r(5));
        assert_eq!(graph.pop_next().unwrap(), Some(r(4)));

        assert!(graph.unbind_resource(r(3), r(5), "a").unwrap());
        assert_eq!(graph.pop_next().unwrap(), Some(r(5)));
        assert_eq!(graph.canonical_path(r(5)).unwrap(), ShortestPath::Unreachable);
    }

    proptest! {
        #[test]
        fn second_bind_of_a_name_is_rejected(
            name in "[a-zA-Z0-9._-]{1,16}",
            first in 3i64..1000,
            second in 3i64..1000,
        ) {
            prop_assume!(name != "." && name != "..");
            let graph = graph();
            let id = graph.bind_resource(ResourceId::ROOT, r(first), &name).unwrap();

            let err = graph.bind_resource(ResourceId::ROOT, r(second), &name).unwrap_err();
            prop_assert!(err.is_conflict());
            prop_assert_eq!(graph.lookup(ResourceId::ROOT, &name).unwrap().map(|b| b.id), Some(id));
            prop_assert_eq!(graph.lookup_resource_id(ResourceId::ROOT, &name).unwrap(), r(first));
        }
    }

    #[test]
    fn debug_output() {
        let debug = format!("{:?}", graph());
        assert!(debug.contains("BindGraph"));
        assert!(debug.contains("reject_cycles"));
    }
}
