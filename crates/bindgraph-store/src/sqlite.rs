//! SQLite bind store.
//!
//! Two tables back the graph:
//!
//! - `binds(id, collection_id, resource_id, name, updated_at)` with a unique
//!   `(collection_id, name)` constraint and an index on `resource_id` for
//!   upward walks.
//! - `cleanup(id, resource_id)`, a FIFO ordered by its autoincrement id.
//!
//! Several processes may share one database file. Writers serialize on
//! SQLite's write lock and wait up to the configured busy timeout for it.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use tracing::{debug, info, warn};

use bindgraph_types::{
    Bind, BindId, CleanupId, CleanupRequest, Clock, NewBind, ParentEdge, ResourceId, SystemClock,
    Timestamp,
};

use crate::error::{StoreError, StoreResult};
use crate::traits::{BindStore, BindTxn, CleanupQueue, Transactional};

/// Default time a writer waits for the database lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Frontier ids per `parents_of` query.
const FRONTIER_CHUNK: usize = 500;

/// Excluded bind ids bound into a `parents_of` query; keeps the statement
/// under SQLite's host-parameter limit.
const MAX_BOUND_EXCLUSIONS: usize = 20_000;

const BIND_COLUMNS: &str = "id, collection_id, resource_id, name, updated_at";

/// A [`BindStore`], [`CleanupQueue`] and [`Transactional`] backed by SQLite.
pub struct SqliteBindStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteBindStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open the database at `path` with an explicit busy timeout.
    pub fn open_with(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(busy_timeout)?;
        initialize_schema(&conn)?;

        info!(path = %path.display(), "opened sqlite bind store");
        Ok(Self::from_connection(conn))
    }

    /// A private in-memory database, gone when the store is dropped.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Replace the clock used to stamp mutations.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock::new()),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl std::fmt::Debug for SqliteBindStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = self
            .conn
            .lock()
            .ok()
            .and_then(|c| c.path().map(str::to_string));
        f.debug_struct("SqliteBindStore").field("path", &path).finish()
    }
}

fn initialize_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS binds (
           id INTEGER PRIMARY KEY AUTOINCREMENT,
           collection_id INTEGER NOT NULL,
           resource_id INTEGER NOT NULL,
           name TEXT NOT NULL,
           updated_at INTEGER NOT NULL,
           UNIQUE (collection_id, name)
         );
         CREATE INDEX IF NOT EXISTS binds_by_resource
           ON binds (resource_id);
         CREATE TABLE IF NOT EXISTS cleanup (
           id INTEGER PRIMARY KEY AUTOINCREMENT,
           resource_id INTEGER NOT NULL
         );",
    )?;
    Ok(())
}

fn bind_from_row(row: &Row<'_>) -> rusqlite::Result<Bind> {
    Ok(Bind {
        id: BindId::new(row.get(0)?),
        collection: ResourceId::new(row.get(1)?),
        resource: ResourceId::new(row.get(2)?),
        name: row.get(3)?,
        updated_at: Timestamp::from_micros(row.get(4)?),
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Statements shared by the store and its transaction handle.
mod sql {
    use super::*;

    pub(super) fn insert(conn: &Connection, bind: &NewBind, stamp: Timestamp) -> StoreResult<BindId> {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO binds (collection_id, resource_id, name, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        match stmt.execute(params![
            bind.collection.get(),
            bind.resource.get(),
            bind.name,
            stamp.as_micros()
        ]) {
            Ok(_) => Ok(BindId::new(conn.last_insert_rowid())),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateName {
                collection: bind.collection,
                name: bind.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) fn bulk_insert(
        conn: &Connection,
        binds: &[NewBind],
        stamp: Timestamp,
    ) -> StoreResult<Vec<BindId>> {
        if binds.is_empty() {
            return Ok(Vec::new());
        }

        conn.execute_batch("SAVEPOINT bulk_bind")?;
        let inserted: StoreResult<Vec<BindId>> =
            binds.iter().map(|bind| insert(conn, bind, stamp)).collect();
        match inserted {
            Ok(ids) => {
                conn.execute_batch("RELEASE bulk_bind")?;
                Ok(ids)
            }
            Err(e) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK TO bulk_bind; RELEASE bulk_bind") {
                    warn!(error = %rollback, "failed to roll back bind batch");
                }
                Err(e)
            }
        }
    }

    pub(super) fn delete(
        conn: &Connection,
        collection: ResourceId,
        resource: ResourceId,
        name: &str,
    ) -> StoreResult<bool> {
        let mut stmt = conn.prepare_cached(
            "DELETE FROM binds WHERE collection_id = ?1 AND resource_id = ?2 AND name = ?3",
        )?;
        let changed = stmt.execute(params![collection.get(), resource.get(), name])?;
        Ok(changed > 0)
    }

    pub(super) fn lookup_by_name(
        conn: &Connection,
        collection: ResourceId,
        name: &str,
    ) -> StoreResult<Option<Bind>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {BIND_COLUMNS} FROM binds WHERE collection_id = ?1 AND name = ?2"
        ))?;
        Ok(stmt
            .query_row(params![collection.get(), name], bind_from_row)
            .optional()?)
    }

    pub(super) fn list_children(
        conn: &Connection,
        collection: ResourceId,
        exclude_self: bool,
    ) -> StoreResult<Vec<Bind>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {BIND_COLUMNS} FROM binds
             WHERE collection_id = ?1 AND NOT (?2 AND resource_id = collection_id)
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![collection.get(), exclude_self], bind_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub(super) fn rebind(
        conn: &Connection,
        old_collection: ResourceId,
        old_name: &str,
        new_collection: ResourceId,
        new_name: &str,
        stamp: Timestamp,
    ) -> StoreResult<Bind> {
        let mut stmt = conn.prepare_cached(&format!(
            "UPDATE binds SET collection_id = ?3, name = ?4, updated_at = ?5
             WHERE collection_id = ?1 AND name = ?2
             RETURNING {BIND_COLUMNS}"
        ))?;
        let updated = stmt
            .query_row(
                params![
                    old_collection.get(),
                    old_name,
                    new_collection.get(),
                    new_name,
                    stamp.as_micros()
                ],
                bind_from_row,
            )
            .optional();
        match updated {
            Ok(Some(bind)) => Ok(bind),
            Ok(None) => Err(StoreError::BindNotFound {
                collection: old_collection,
                name: old_name.to_string(),
            }),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateName {
                collection: new_collection,
                name: new_name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) fn parents_of(
        conn: &Connection,
        frontier: &[ResourceId],
        excluded: &BTreeSet<BindId>,
    ) -> StoreResult<Vec<ParentEdge>> {
        // Past this many ids the exclusions are filtered after the query.
        let bound_exclusions = excluded.len() <= MAX_BOUND_EXCLUSIONS;
        let exclusion_clause = if excluded.is_empty() || !bound_exclusions {
            String::new()
        } else {
            format!(" AND id NOT IN ({})", vec!["?"; excluded.len()].join(", "))
        };

        let mut edges = Vec::new();
        for chunk in frontier.chunks(FRONTIER_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {BIND_COLUMNS} FROM binds
                 WHERE resource_id IN ({placeholders}){exclusion_clause}"
            ))?;
            let ids = chunk.iter().map(|r| r.get());
            let params: Vec<i64> = if exclusion_clause.is_empty() {
                ids.collect()
            } else {
                ids.chain(excluded.iter().map(|b| b.get())).collect()
            };
            let rows = stmt.query_map(params_from_iter(params), bind_from_row)?;
            for row in rows {
                let bind = row?;
                if bound_exclusions || !excluded.contains(&bind.id) {
                    edges.push(ParentEdge::from(&bind));
                }
            }
        }
        edges.sort_by_key(|edge| edge.bind);
        edges.dedup_by_key(|edge| edge.bind);
        Ok(edges)
    }

    pub(super) fn parent_binds(conn: &Connection, resource: ResourceId) -> StoreResult<Vec<Bind>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {BIND_COLUMNS} FROM binds WHERE resource_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![resource.get()], bind_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub(super) fn max_child_updated_at(
        conn: &Connection,
        collection: ResourceId,
        floor: Timestamp,
    ) -> StoreResult<Timestamp> {
        let mut stmt =
            conn.prepare_cached("SELECT MAX(updated_at) FROM binds WHERE collection_id = ?1")?;
        let latest: Option<i64> = stmt.query_row(params![collection.get()], |row| row.get(0))?;
        Ok(latest
            .map(Timestamp::from_micros)
            .map_or(floor, |latest| latest.max(floor)))
    }

    pub(super) fn enqueue(conn: &Connection, resources: &[ResourceId]) -> StoreResult<usize> {
        let mut stmt = conn.prepare_cached("INSERT INTO cleanup (resource_id) VALUES (?1)")?;
        for resource in resources {
            stmt.execute(params![resource.get()])?;
        }
        Ok(resources.len())
    }

    pub(super) fn pop_next(conn: &Connection) -> StoreResult<Option<ResourceId>> {
        let mut stmt = conn.prepare_cached(
            "DELETE FROM cleanup WHERE id = (SELECT MIN(id) FROM cleanup)
             RETURNING resource_id",
        )?;
        Ok(stmt
            .query_row([], |row| row.get::<_, i64>(0))
            .optional()?
            .map(ResourceId::new))
    }

    pub(super) fn pending(conn: &Connection) -> StoreResult<usize> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cleanup", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub(super) fn list_pending(conn: &Connection, limit: usize) -> StoreResult<Vec<CleanupRequest>> {
        let mut stmt =
            conn.prepare_cached("SELECT id, resource_id FROM cleanup ORDER BY id LIMIT ?1")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            Ok(CleanupRequest {
                id: CleanupId::new(row.get(0)?),
                resource: ResourceId::new(row.get(1)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl BindStore for SqliteBindStore {
    fn insert(&self, bind: &NewBind) -> StoreResult<BindId> {
        let stamp = self.clock.now();
        let id = sql::insert(&*self.lock()?, bind, stamp)?;
        debug!(bind = %id, collection = %bind.collection, resource = %bind.resource, name = %bind.name, "inserted bind");
        Ok(id)
    }

    fn bulk_insert(&self, binds: &[NewBind]) -> StoreResult<Vec<BindId>> {
        let stamp = self.clock.now();
        let ids = sql::bulk_insert(&*self.lock()?, binds, stamp)?;
        debug!(count = ids.len(), "inserted bind batch");
        Ok(ids)
    }

    fn delete(&self, collection: ResourceId, resource: ResourceId, name: &str) -> StoreResult<bool> {
        let removed = sql::delete(&*self.lock()?, collection, resource, name)?;
        debug!(%collection, %resource, name, removed, "deleted bind");
        Ok(removed)
    }

    fn lookup_by_name(&self, collection: ResourceId, name: &str) -> StoreResult<Option<Bind>> {
        sql::lookup_by_name(&*self.lock()?, collection, name)
    }

    fn list_children(&self, collection: ResourceId, exclude_self: bool) -> StoreResult<Vec<Bind>> {
        sql::list_children(&*self.lock()?, collection, exclude_self)
    }

    fn rebind(
        &self,
        old_collection: ResourceId,
        old_name: &str,
        new_collection: ResourceId,
        new_name: &str,
    ) -> StoreResult<Bind> {
        let stamp = self.clock.now();
        let bind = sql::rebind(
            &*self.lock()?,
            old_collection,
            old_name,
            new_collection,
            new_name,
            stamp,
        )?;
        debug!(bind = %bind.id, %old_collection, old_name, %new_collection, new_name, "rebound");
        Ok(bind)
    }

    fn parents_of(
        &self,
        frontier: &[ResourceId],
        excluded: &BTreeSet<BindId>,
    ) -> StoreResult<Vec<ParentEdge>> {
        sql::parents_of(&*self.lock()?, frontier, excluded)
    }

    fn parent_binds(&self, resource: ResourceId) -> StoreResult<Vec<Bind>> {
        sql::parent_binds(&*self.lock()?, resource)
    }

    fn max_child_updated_at(
        &self,
        collection: ResourceId,
        floor: Timestamp,
    ) -> StoreResult<Timestamp> {
        sql::max_child_updated_at(&*self.lock()?, collection, floor)
    }
}

impl CleanupQueue for SqliteBindStore {
    fn enqueue(&self, resources: &[ResourceId]) -> StoreResult<usize> {
        if resources.is_empty() {
            return Ok(0);
        }
        let conn = self.lock()?;
        conn.execute_batch("SAVEPOINT enqueue")?;
        match sql::enqueue(&conn, resources) {
            Ok(n) => {
                conn.execute_batch("RELEASE enqueue")?;
                Ok(n)
            }
            Err(e) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK TO enqueue; RELEASE enqueue") {
                    warn!(error = %rollback, "failed to roll back cleanup requests");
                }
                Err(e)
            }
        }
    }

    fn pop_next(&self) -> StoreResult<Option<ResourceId>> {
        sql::pop_next(&*self.lock()?)
    }

    fn pending(&self) -> StoreResult<usize> {
        sql::pending(&*self.lock()?)
    }

    fn list_pending(&self, limit: usize) -> StoreResult<Vec<CleanupRequest>> {
        sql::list_pending(&*self.lock()?, limit)
    }
}

/// Transaction handle of [`SqliteBindStore`].
///
/// Opened with `BEGIN IMMEDIATE`; rolls back on drop unless committed.
pub struct SqliteTxn<'t> {
    conn: &'t Connection,
    clock: &'t dyn Clock,
    committed: bool,
}

impl<'t> SqliteTxn<'t> {
    fn begin(conn: &'t Connection, clock: &'t dyn Clock) -> StoreResult<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            clock,
            committed: false,
        })
    }

    fn commit(mut self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for SqliteTxn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

impl BindStore for SqliteTxn<'_> {
    fn insert(&self, bind: &NewBind) -> StoreResult<BindId> {
        sql::insert(self.conn, bind, self.clock.now())
    }

    fn bulk_insert(&self, binds: &[NewBind]) -> StoreResult<Vec<BindId>> {
        sql::bulk_insert(self.conn, binds, self.clock.now())
    }

    fn delete(&self, collection: ResourceId, resource: ResourceId, name: &str) -> StoreResult<bool> {
        sql::delete(self.conn, collection, resource, name)
    }

    fn lookup_by_name(&self, collection: ResourceId, name: &str) -> StoreResult<Option<Bind>> {
        sql::lookup_by_name(self.conn, collection, name)
    }

    fn list_children(&self, collection: ResourceId, exclude_self: bool) -> StoreResult<Vec<Bind>> {
        sql::list_children(self.conn, collection, exclude_self)
    }

    fn rebind(
        &self,
        old_collection: ResourceId,
        old_name: &str,
        new_collection: ResourceId,
        new_name: &str,
    ) -> StoreResult<Bind> {
        sql::rebind(
            self.conn,
            old_collection,
            old_name,
            new_collection,
            new_name,
            self.clock.now(),
        )
    }

    fn parents_of(
        &self,
        frontier: &[ResourceId],
        excluded: &BTreeSet<BindId>,
    ) -> StoreResult<Vec<ParentEdge>> {
        sql::parents_of(self.conn, frontier, excluded)
    }

    fn parent_binds(&self, resource: ResourceId) -> StoreResult<Vec<Bind>> {
        sql::parent_binds(self.conn, resource)
    }

    fn max_child_updated_at(
        &self,
        collection: ResourceId,
        floor: Timestamp,
    ) -> StoreResult<Timestamp> {
        sql::max_child_updated_at(self.conn, collection, floor)
    }
}

impl CleanupQueue for SqliteTxn<'_> {
    fn enqueue(&self, resources: &[ResourceId]) -> StoreResult<usize> {
        sql::enqueue(self.conn, resources)
    }

    fn pop_next(&self) -> StoreResult<Option<ResourceId>> {
        sql::pop_next(self.conn)
    }

    fn pending(&self) -> StoreResult<usize> {
        sql::pending(self.conn)
    }

    fn list_pending(&self, limit: usize) -> StoreResult<Vec<CleanupRequest>> {
        sql::list_pending(self.conn, limit)
    }
}

impl Transactional for SqliteBindStore {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn BindTxn) -> Result<T, E>,
        E: From<StoreError>,
    {
        let conn = self.lock()?;
        let txn = SqliteTxn::begin(&conn, &*self.clock)?;
        let out = f(&txn)?;
        txn.commit()?;
        Ok(out)
    }
}
