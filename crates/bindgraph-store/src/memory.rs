//! In-memory bind store for tests and embedding.
//!
//! [`InMemoryBindStore`] keeps the `binds` and `cleanup` tables in ordered
//! maps behind a `RwLock`, with a unique `(collection, name)` index and a
//! per-resource index for upward walks. Transactions hold the write lock,
//! work on a copy of the tables and publish the copy on commit.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::debug;

use bindgraph_types::{
    Bind, BindId, CleanupId, CleanupRequest, Clock, NewBind, ParentEdge, ResourceId, SystemClock, Timestamp,
};

use crate::error::{StoreError, StoreResult};
use crate::traits::{BindStore, BindTxn, CleanupQueue, Transactional};

/// The two tables plus their indexes.
#[derive(Clone, Debug, Default)]
struct Tables {
    binds: BTreeMap<BindId, Bind>,
    /// Unique index on `(collection, name)`.
    by_name: HashMap<(ResourceId, String), BindId>,
    /// Incoming binds of each resource.
    by_resource: HashMap<ResourceId, BTreeSet<BindId>>,
    last_bind: i64,
    cleanup: BTreeMap<CleanupId, ResourceId>,
    last_cleanup: i64,
}

impl Tables {
    fn key(collection: ResourceId, name: &str) -> (ResourceId, String) {
        (collection, name.to_string())
    }

    fn insert(&mut self, bind: &NewBind, stamp: Timestamp) -> StoreResult<BindId> {
        let key = Self::key(bind.collection, &bind.name);
        if self.by_name.contains_key(&key) {
            return Err(StoreError::DuplicateName {
                collection: bind.collection,
                name: bind.name.clone(),
            });
        }

        self.last_bind += 1;
        let id = BindId::new(self.last_bind);
        self.by_name.insert(key, id);
        self.by_resource.entry(bind.resource).or_default().insert(id);
        self.binds.insert(
            id,
            Bind {
                id,
                collection: bind.collection,
                resource: bind.resource,
                name: bind.name.clone(),
                updated_at: stamp,
            },
        );
        Ok(id)
    }

    fn bulk_insert(&mut self, binds: &[NewBind], stamp: Timestamp) -> StoreResult<Vec<BindId>> {
        // Check every constraint up front so a failure leaves no rows behind.
        let mut batch_keys = HashSet::with_capacity(binds.len());
        for bind in binds {
            let key = Self::key(bind.collection, &bind.name);
            if self.by_name.contains_key(&key) || !batch_keys.insert(key) {
                return Err(StoreError::DuplicateName {
                    collection: bind.collection,
                    name: bind.name.clone(),
                });
            }
        }

        binds.iter().map(|bind| self.insert(bind, stamp)).collect()
    }

    fn delete(&mut self, collection: ResourceId, resource: ResourceId, name: &str) -> bool {
        let key = Self::key(collection, name);
        let Some(&id) = self.by_name.get(&key) else {
            return false;
        };
        if self.binds.get(&id).map(|b| b.resource) != Some(resource) {
            return false;
        }

        self.by_name.remove(&key);
        self.binds.remove(&id);
        if let Some(incoming) = self.by_resource.get_mut(&resource) {
            incoming.remove(&id);
            if incoming.is_empty() {
                self.by_resource.remove(&resource);
            }
        }
        true
    }

    fn lookup_by_name(&self, collection: ResourceId, name: &str) -> Option<Bind> {
        self.by_name
            .get(&Self::key(collection, name))
            .and_then(|id| self.binds.get(id))
            .cloned()
    }

    fn list_children(&self, collection: ResourceId, exclude_self: bool) -> Vec<Bind> {
        self.binds
            .values()
            .filter(|b| b.collection == collection)
            .filter(|b| !(exclude_self && b.is_self_bind()))
            .cloned()
            .collect()
    }

    fn rebind(
        &mut self,
        old_collection: ResourceId,
        old_name: &str,
        new_collection: ResourceId,
        new_name: &str,
        stamp: Timestamp,
    ) -> StoreResult<Bind> {
        let old_key = Self::key(old_collection, old_name);
        let id = *self
            .by_name
            .get(&old_key)
            .ok_or_else(|| StoreError::BindNotFound {
                collection: old_collection,
                name: old_name.to_string(),
            })?;

        let new_key = Self::key(new_collection, new_name);
        if let Some(&other) = self.by_name.get(&new_key) {
            if other != id {
                return Err(StoreError::DuplicateName {
                    collection: new_collection,
                    name: new_name.to_string(),
                });
            }
        }

        let bind = self.binds.get_mut(&id).ok_or_else(|| StoreError::BindNotFound {
            collection: old_collection,
            name: old_name.to_string(),
        })?;
        bind.collection = new_collection;
        bind.name = new_name.to_string();
        bind.updated_at = stamp;
        let updated = bind.clone();

        self.by_name.remove(&old_key);
        self.by_name.insert(new_key, id);
        Ok(updated)
    }

    fn parents_of(&self, frontier: &[ResourceId], excluded: &BTreeSet<BindId>) -> Vec<ParentEdge> {
        let ids: BTreeSet<BindId> = frontier
            .iter()
            .filter_map(|r| self.by_resource.get(r))
            .flatten()
            .filter(|id| !excluded.contains(id))
            .copied()
            .collect();
        ids.iter()
            .filter_map(|id| self.binds.get(id))
            .map(ParentEdge::from)
            .collect()
    }

    fn parent_binds(&self, resource: ResourceId) -> Vec<Bind> {
        self.by_resource
            .get(&resource)
            .into_iter()
            .flatten()
            .filter_map(|id| self.binds.get(id))
            .cloned()
            .collect()
    }

    fn max_child_updated_at(&self, collection: ResourceId, floor: Timestamp) -> Timestamp {
        self.binds
            .values()
            .filter(|b| b.collection == collection)
            .map(|b| b.updated_at)
            .fold(floor, Timestamp::max)
    }

    fn enqueue(&mut self, resources: &[ResourceId]) -> usize {
        for &resource in resources {
            self.last_cleanup += 1;
            self.cleanup.insert(CleanupId::new(self.last_cleanup), resource);
        }
        resources.len()
    }

    fn pop_next(&mut self) -> Option<ResourceId> {
        self.cleanup.pop_first().map(|(_, resource)| resource)
    }

    fn list_pending(&self, limit: usize) -> Vec<CleanupRequest> {
        self.cleanup
            .iter()
            .take(limit)
            .map(|(&id, &resource)| CleanupRequest { id, resource })
            .collect()
    }
}

/// An in-memory implementation of [`BindStore`], [`CleanupQueue`] and
/// [`Transactional`].
///
/// All data lives in ordered maps behind a `RwLock`. Data is lost when the
/// store is dropped.
pub struct InMemoryBindStore {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBindStore {
    /// Create an empty store stamping with a [`SystemClock`].
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty store stamping with the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
        }
    }

    /// Number of stored binds.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.binds.len())
    }

    /// Returns `true` if no binds are stored.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.read()?.binds.is_empty())
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for InMemoryBindStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBindStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBindStore")
            .field("bind_count", &self.len().ok())
            .finish()
    }
}

impl BindStore for InMemoryBindStore {
    fn insert(&self, bind: &NewBind) -> StoreResult<BindId> {
        let stamp = self.clock.now();
        let id = self.write()?.insert(bind, stamp)?;
        debug!(bind = %id, collection = %bind.collection, resource = %bind.resource, name = %bind.name, "inserted bind");
        Ok(id)
    }

    fn bulk_insert(&self, binds: &[NewBind]) -> StoreResult<Vec<BindId>> {
        if binds.is_empty() {
            return Ok(Vec::new());
        }
        let stamp = self.clock.now();
        let ids = self.write()?.bulk_insert(binds, stamp)?;
        debug!(count = ids.len(), "inserted bind batch");
        Ok(ids)
    }

    fn delete(&self, collection: ResourceId, resource: ResourceId, name: &str) -> StoreResult<bool> {
        let removed = self.write()?.delete(collection, resource, name);
        debug!(%collection, %resource, name, removed, "deleted bind");
        Ok(removed)
    }

    fn lookup_by_name(&self, collection: ResourceId, name: &str) -> StoreResult<Option<Bind>> {
        Ok(self.read()?.lookup_by_name(collection, name))
    }

    fn list_children(&self, collection: ResourceId, exclude_self: bool) -> StoreResult<Vec<Bind>> {
        Ok(self.read()?.list_children(collection, exclude_self))
    }

    fn rebind(
        &self,
        old_collection: ResourceId,
        old_name: &str,
        new_collection: ResourceId,
        new_name: &str,
    ) -> StoreResult<Bind> {
        let stamp = self.clock.now();
        let bind = self
            .write()?
            .rebind(old_collection, old_name, new_collection, new_name, stamp)?;
        debug!(bind = %bind.id, %old_collection, old_name, %new_collection, new_name, "rebound");
        Ok(bind)
    }

    fn parents_of(
        &self,
        frontier: &[ResourceId],
        excluded: &BTreeSet<BindId>,
    ) -> StoreResult<Vec<ParentEdge>> {
        Ok(self.read()?.parents_of(frontier, excluded))
    }

    fn parent_binds(&self, resource: ResourceId) -> StoreResult<Vec<Bind>> {
        Ok(self.read()?.parent_binds(resource))
    }

    fn max_child_updated_at(
        &self,
        collection: ResourceId,
        floor: Timestamp,
    ) -> StoreResult<Timestamp> {
        Ok(self.read()?.max_child_updated_at(collection, floor))
    }
}

impl CleanupQueue for InMemoryBindStore {
    fn enqueue(&self, resources: &[ResourceId]) -> StoreResult<usize> {
        if resources.is_empty() {
            return Ok(0);
        }
        Ok(self.write()?.enqueue(resources))
    }

    fn pop_next(&self) -> StoreResult<Option<ResourceId>> {
        Ok(self.write()?.pop_next())
    }

    fn pending(&self) -> StoreResult<usize> {
        Ok(self.read()?.cleanup.len())
    }

    fn list_pending(&self, limit: usize) -> StoreResult<Vec<CleanupRequest>> {
        Ok(self.read()?.list_pending(limit))
    }
}

/// Transaction handle of [`InMemoryBindStore`]: a private working copy of
/// the tables.
pub struct MemoryTxn<'t> {
    tables: RefCell<Tables>,
    clock: &'t dyn Clock,
}

impl BindStore for MemoryTxn<'_> {
    fn insert(&self, bind: &NewBind) -> StoreResult<BindId> {
        let stamp = self.clock.now();
        self.tables.borrow_mut().insert(bind, stamp)
    }

    fn bulk_insert(&self, binds: &[NewBind]) -> StoreResult<Vec<BindId>> {
        if binds.is_empty() {
            return Ok(Vec::new());
        }
        let stamp = self.clock.now();
        self.tables.borrow_mut().bulk_insert(binds, stamp)
    }

    fn delete(&self, collection: ResourceId, resource: ResourceId, name: &str) -> StoreResult<bool> {
        Ok(self.tables.borrow_mut().delete(collection, resource, name))
    }

    fn lookup_by_name(&self, collection: ResourceId, name: &str) -> StoreResult<Option<Bind>> {
        Ok(self.tables.borrow().lookup_by_name(collection, name))
    }

    fn list_children(&self, collection: ResourceId, exclude_self: bool) -> StoreResult<Vec<Bind>> {
        Ok(self.tables.borrow().list_children(collection, exclude_self))
    }

    fn rebind(
        &self,
        old_collection: ResourceId,
        old_name: &str,
        new_collection: ResourceId,
        new_name: &str,
    ) -> StoreResult<Bind> {
        let stamp = self.clock.now();
        self.tables
            .borrow_mut()
            .rebind(old_collection, old_name, new_collection, new_name, stamp)
    }

    fn parents_of(
        &self,
        frontier: &[ResourceId],
        excluded: &BTreeSet<BindId>,
    ) -> StoreResult<Vec<ParentEdge>> {
        Ok(self.tables.borrow().parents_of(frontier, excluded))
    }

    fn parent_binds(&self, resource: ResourceId) -> StoreResult<Vec<Bind>> {
        Ok(self.tables.borrow().parent_binds(resource))
    }

    fn max_child_updated_at(
        &self,
        collection: ResourceId,
        floor: Timestamp,
    ) -> StoreResult<Timestamp> {
        Ok(self.tables.borrow().max_child_updated_at(collection, floor))
    }
}

impl CleanupQueue for MemoryTxn<'_> {
    fn enqueue(&self, resources: &[ResourceId]) -> StoreResult<usize> {
        Ok(self.tables.borrow_mut().enqueue(resources))
    }

    fn pop_next(&self) -> StoreResult<Option<ResourceId>> {
        Ok(self.tables.borrow_mut().pop_next())
    }

    fn pending(&self) -> StoreResult<usize> {
        Ok(self.tables.borrow().cleanup.len())
    }

    fn list_pending(&self, limit: usize) -> StoreResult<Vec<CleanupRequest>> {
        Ok(self.tables.borrow().list_pending(limit))
    }
}

impl Transactional for InMemoryBindStore {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn BindTxn) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.write()?;
        let txn = MemoryTxn {
            tables: RefCell::new(guard.clone()),
            clock: &*self.clock,
        };
        let out = f(&txn)?;
        *guard = txn.tables.into_inner();
        Ok(out)
    }
}
