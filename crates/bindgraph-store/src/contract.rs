//! Behavior every backend must share. Each backend's test module calls these
//! with a fresh store.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::thread;

use bindgraph_types::{NewBind, ResourceId, Timestamp};

use crate::error::StoreError;
use crate::traits::{BindStore, CleanupQueue, Transactional};

fn r(id: i64) -> ResourceId {
    ResourceId::new(id)
}

fn nb(collection: i64, resource: i64, name: &str) -> NewBind {
    NewBind::new(r(collection), r(resource), name)
}

// --- Binds ---

pub fn insert_and_lookup<S: BindStore>(store: &S) {
    let id = store.insert(&nb(2, 3, "docs")).unwrap();
    let bind = store.lookup_by_name(r(2), "docs").unwrap().unwrap();
    assert_eq!(bind.id, id);
    assert_eq!(bind.collection, r(2));
    assert_eq!(bind.resource, r(3));
    assert_eq!(bind.name, "docs");
    assert!(bind.updated_at > Timestamp::EPOCH);
    assert_eq!(store.lookup_resource_id(r(2), "docs").unwrap(), r(3));

    let second = store.insert(&nb(3, 4, "readme")).unwrap();
    assert!(second > id);
}

pub fn duplicate_name_rejected<S: BindStore>(store: &S) {
    store.insert(&nb(2, 3, "a")).unwrap();
    let err = store.insert(&nb(2, 4, "a")).unwrap_err();
    assert!(matches!(
        err,
        StoreError::DuplicateName { collection, ref name } if collection == r(2) && name == "a"
    ));
    assert!(err.is_constraint_violation());
    assert_eq!(store.lookup_resource_id(r(2), "a").unwrap(), r(3));
}

pub fn same_name_in_different_collections<S: BindStore>(store: &S) {
    store.insert(&nb(2, 3, "x")).unwrap();
    store.insert(&nb(3, 4, "x")).unwrap();
    assert_eq!(store.lookup_resource_id(r(2), "x").unwrap(), r(3));
    assert_eq!(store.lookup_resource_id(r(3), "x").unwrap(), r(4));
}

pub fn delete_is_idempotent<S: BindStore>(store: &S) {
    store.insert(&nb(2, 3, "a")).unwrap();
    assert!(store.delete(r(2), r(3), "a").unwrap());
    assert!(!store.delete(r(2), r(3), "a").unwrap());
    assert!(store.lookup_by_name(r(2), "a").unwrap().is_none());
}

pub fn delete_requires_matching_resource<S: BindStore>(store: &S) {
    store.insert(&nb(2, 3, "a")).unwrap();
    assert!(!store.delete(r(2), r(99), "a").unwrap());
    assert_eq!(store.lookup_resource_id(r(2), "a").unwrap(), r(3));
}

pub fn lookup_resource_id_absent_is_none<S: BindStore>(store: &S) {
    assert!(store.lookup_resource_id(r(2), "missing").unwrap().is_none());
    assert!(store.lookup_by_name(r(2), "missing").unwrap().is_none());
}

pub fn list_children_exclude_self<S: BindStore>(store: &S) {
    store.insert(&nb(2, 2, "")).unwrap();
    store.insert(&nb(2, 4, "b")).unwrap();
    store.insert(&nb(2, 3, "a")).unwrap();
    store.insert(&nb(3, 5, "c")).unwrap();

    let all = store.list_children(r(2), false).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].id < w[1].id));

    let members: Vec<_> = store
        .list_children(r(2), true)
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(members, vec!["b", "a"]);

    assert!(store.list_children(r(42), false).unwrap().is_empty());
}

pub fn rebind_moves_and_restamps<S: BindStore>(store: &S) {
    let id = store.insert(&nb(2, 3, "a")).unwrap();
    let before = store.lookup_by_name(r(2), "a").unwrap().unwrap();

    let moved = store.rebind(r(2), "a", r(5), "b").unwrap();
    assert_eq!(moved.id, id);
    assert_eq!(moved.resource, r(3));
    assert_eq!(moved.collection, r(5));
    assert_eq!(moved.name, "b");
    assert!(moved.updated_at > before.updated_at);

    assert!(store.lookup_by_name(r(2), "a").unwrap().is_none());
    assert_eq!(store.lookup_by_name(r(5), "b").unwrap(), Some(moved));
}

pub fn rebind_missing_source<S: BindStore>(store: &S) {
    let err = store.rebind(r(2), "nope", r(2), "other").unwrap_err();
    assert!(matches!(err, StoreError::BindNotFound { .. }));
}

pub fn rebind_onto_taken_name<S: BindStore>(store: &S) {
    store.insert(&nb(2, 3, "a")).unwrap();
    store.insert(&nb(2, 4, "b")).unwrap();
    let err = store.rebind(r(2), "a", r(2), "b").unwrap_err();
    assert!(matches!(err, StoreError::DuplicateName { .. }));
    assert_eq!(store.lookup_resource_id(r(2), "a").unwrap(), r(3));
    assert_eq!(store.lookup_resource_id(r(2), "b").unwrap(), r(4));
}

pub fn rebind_in_place_restamps<S: BindStore>(store: &S) {
    store.insert(&nb(2, 3, "a")).unwrap();
    let before = store.lookup_by_name(r(2), "a").unwrap().unwrap();
    let after = store.rebind(r(2), "a", r(2), "a").unwrap();
    assert_eq!(after.id, before.id);
    assert!(after.updated_at > before.updated_at);
}

pub fn bulk_insert_shares_timestamp<S: BindStore>(store: &S) {
    let ids = store
        .bulk_insert(&[nb(2, 3, "a"), nb(2, 4, "b"), nb(3, 5, "c")])
        .unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let stamps: HashSet<Timestamp> = [(2, "a"), (2, "b"), (3, "c")]
        .into_iter()
        .map(|(c, n)| store.lookup_by_name(r(c), n).unwrap().unwrap().updated_at)
        .collect();
    assert_eq!(stamps.len(), 1);

    assert!(store.bulk_insert(&[]).unwrap().is_empty());
}

pub fn bulk_insert_is_all_or_nothing<S: BindStore>(store: &S) {
    store.insert(&nb(2, 9, "taken")).unwrap();
    let err = store
        .bulk_insert(&[nb(2, 3, "a"), nb(2, 4, "taken"), nb(2, 5, "c")])
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateName { .. }));
    assert!(store.lookup_by_name(r(2), "a").unwrap().is_none());
    assert!(store.lookup_by_name(r(2), "c").unwrap().is_none());
    assert_eq!(store.list_children(r(2), false).unwrap().len(), 1);
}

pub fn bulk_insert_rejects_duplicates_within_batch<S: BindStore>(store: &S) {
    let err = store
        .bulk_insert(&[nb(2, 3, "same"), nb(2, 4, "same")])
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateName { .. }));
    assert!(store.list_children(r(2), false).unwrap().is_empty());
}

pub fn parents_of_frontier<S: BindStore>(store: &S) {
    let a = store.insert(&nb(2, 3, "a")).unwrap();
    let b = store.insert(&nb(2, 4, "b")).unwrap();
    let c = store.insert(&nb(3, 4, "again")).unwrap();
    store.insert(&nb(2, 5, "other")).unwrap();

    let edges = store.parents_of(&[r(3), r(4)], &BTreeSet::new()).unwrap();
    let ids: Vec<_> = edges.iter().map(|e| e.bind).collect();
    assert_eq!(ids, vec![a, b, c]);
    assert_eq!(edges[2].child, r(4));
    assert_eq!(edges[2].parent, r(3));
    assert_eq!(edges[2].name, "again");

    let excluded = BTreeSet::from([b]);
    let ids: Vec<_> = store
        .parents_of(&[r(3), r(4)], &excluded)
        .unwrap()
        .into_iter()
        .map(|e| e.bind)
        .collect();
    assert_eq!(ids, vec![a, c]);

    assert!(store.parents_of(&[], &BTreeSet::new()).unwrap().is_empty());
}

pub fn parent_binds_of_resource<S: BindStore>(store: &S) {
    store.insert(&nb(2, 7, "x")).unwrap();
    store.insert(&nb(3, 7, "y")).unwrap();
    let parents: Vec<_> = store
        .parent_binds(r(7))
        .unwrap()
        .into_iter()
        .map(|b| (b.collection, b.name))
        .collect();
    assert_eq!(parents, vec![(r(2), "x".to_string()), (r(3), "y".to_string())]);
    assert!(store.parent_binds(r(8)).unwrap().is_empty());
}

pub fn max_child_updated_at<S: BindStore>(store: &S) {
    let floor = Timestamp::from_micros(1);
    assert_eq!(store.max_child_updated_at(r(2), floor).unwrap(), floor);

    store.insert(&nb(2, 3, "a")).unwrap();
    store.insert(&nb(2, 4, "b")).unwrap();
    let latest = store.lookup_by_name(r(2), "b").unwrap().unwrap().updated_at;
    assert_eq!(store.max_child_updated_at(r(2), floor).unwrap(), latest);

    let future = Timestamp::from_micros(i64::MAX);
    assert_eq!(store.max_child_updated_at(r(2), future).unwrap(), future);
}

// --- Cleanup queue ---

pub fn queue_is_fifo<S: CleanupQueue>(store: &S) {
    assert_eq!(store.pop_next().unwrap(), None);
    assert_eq!(store.enqueue(&[r(5), r(7)]).unwrap(), 2);
    store.enqueue(&[r(6)]).unwrap();
    assert_eq!(store.pending().unwrap(), 3);

    assert_eq!(store.pop_next().unwrap(), Some(r(5)));
    assert_eq!(store.pop_next().unwrap(), Some(r(7)));
    assert_eq!(store.pop_next().unwrap(), Some(r(6)));
    assert_eq!(store.pop_next().unwrap(), None);
    assert_eq!(store.pop_next().unwrap(), None);
    assert_eq!(store.pending().unwrap(), 0);

    assert_eq!(store.enqueue(&[]).unwrap(), 0);
}

pub fn list_pending_leaves_queue_intact<S: CleanupQueue>(store: &S) {
    assert!(store.list_pending(10).unwrap().is_empty());
    store.enqueue(&[r(8), r(3), r(8)]).unwrap();

    let pending = store.list_pending(10).unwrap();
    let resources: Vec<_> = pending.iter().map(|p| p.resource).collect();
    assert_eq!(resources, vec![r(8), r(3), r(8)]);
    assert!(pending.windows(2).all(|w| w[0].id < w[1].id));

    assert_eq!(store.list_pending(2).unwrap(), pending[..2].to_vec());
    assert!(store.list_pending(0).unwrap().is_empty());
    assert_eq!(store.pending().unwrap(), 3);

    assert_eq!(store.pop_next().unwrap(), Some(r(8)));
    assert_eq!(store.list_pending(10).unwrap(), pending[1..].to_vec());
}

pub fn queue_keeps_duplicates<S: CleanupQueue>(store: &S) {
    store.enqueue(&[r(5), r(5)]).unwrap();
    assert_eq!(store.pop_next().unwrap(), Some(r(5)));
    assert_eq!(store.pop_next().unwrap(), Some(r(5)));
    assert_eq!(store.pop_next().unwrap(), None);
}

// --- Transactions ---

pub fn transaction_commits<S: Transactional>(store: &S) {
    store.insert(&nb(2, 3, "a")).unwrap();
    store
        .transaction(|txn| -> Result<(), StoreError> {
            assert!(txn.delete(r(2), r(3), "a")?);
            txn.enqueue(&[r(3)])?;
            assert_eq!(txn.pending()?, 1);
            Ok(())
        })
        .unwrap();

    assert!(store.lookup_by_name(r(2), "a").unwrap().is_none());
    assert_eq!(store.pop_next().unwrap(), Some(r(3)));
}

pub fn transaction_rolls_back<S: Transactional>(store: &S) {
    store.insert(&nb(2, 3, "a")).unwrap();
    let result = store.transaction(|txn| -> Result<(), StoreError> {
        txn.delete(r(2), r(3), "a")?;
        txn.enqueue(&[r(3)])?;
        txn.insert(&nb(2, 4, "b"))?;
        assert!(txn.lookup_by_name(r(2), "a")?.is_none());
        txn.insert(&nb(2, 5, "b"))?;
        Ok(())
    });
    assert!(matches!(result, Err(StoreError::DuplicateName { .. })));

    assert_eq!(store.lookup_resource_id(r(2), "a").unwrap(), r(3));
    assert!(store.lookup_by_name(r(2), "b").unwrap().is_none());
    assert_eq!(store.pending().unwrap(), 0);
}

// --- Concurrency ---

pub fn concurrent_duplicate_inserts<S: BindStore + Send + Sync + 'static>(store: Arc<S>) {
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.insert(&nb(2, 10 + i, "contested")))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let dup = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::DuplicateName { .. })))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(dup, 7);
}

pub fn concurrent_pops_deliver_once<S: CleanupQueue + Send + Sync + 'static>(store: Arc<S>) {
    let ids: Vec<ResourceId> = (100..300).map(r).collect();
    store.enqueue(&ids).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut popped = Vec::new();
                while let Some(id) = store.pop_next().unwrap() {
                    popped.push(id);
                }
                popped
            })
        })
        .collect();

    let mut all: Vec<ResourceId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(all.len(), ids.len());
    all.sort();
    all.dedup();
    assert_eq!(all, ids);
}
