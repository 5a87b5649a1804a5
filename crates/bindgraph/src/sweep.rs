//! Orphan sweeper.
//!
//! Drains the cleanup queue. For each request it re-checks, inside one
//! transaction, whether the resource is still reachable from the root. An
//! unreachable resource loses all of its binds, is handed to the
//! [`ResourceLifecycle`] for deletion, and its former members are queued so
//! a deleted collection's subtree is examined next.
//!
//! Delivery is at most once. The pop commits on its own before the check
//! runs, so a resource the lifecycle refuses, or a crash mid-sweep, costs
//! that one request and never blocks the requests behind it. The refused
//! resource keeps its binds and stays stored until something queues it
//! again. A request may also name a resource that is already gone;
//! `delete_resource` must tolerate that.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{debug, info, warn};

use bindgraph_store::{CleanupQueue, Transactional};
use bindgraph_types::ResourceId;

use crate::error::{GraphError, GraphResult};
use crate::graph::{BindGraph, Reclaimed};
use crate::lifecycle::ResourceLifecycle;

/// What one [`Sweeper::sweep_one`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The queue was empty.
    Idle,
    /// The resource is still reachable (or is the root) and was left alone.
    Kept(ResourceId),
    /// The resource was unreachable and has been deleted.
    Deleted {
        resource: ResourceId,
        /// Former members queued for their own check.
        children: usize,
    },
    /// The lifecycle refused; the resource and its binds are untouched and
    /// the request is gone.
    Failed(ResourceId),
}

/// Totals over several sweeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub deleted: usize,
    pub kept: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: SweepOutcome) {
        match outcome {
            SweepOutcome::Idle => return,
            SweepOutcome::Kept(_) => self.kept += 1,
            SweepOutcome::Deleted { .. } => self.deleted += 1,
            SweepOutcome::Failed(_) => self.failed += 1,
        }
        self.examined += 1;
    }

    fn merge(&mut self, other: SweepReport) {
        self.examined += other.examined;
        self.deleted += other.deleted;
        self.kept += other.kept;
        self.failed += other.failed;
    }
}

/// Drains a graph's cleanup queue into a [`ResourceLifecycle`].
///
/// Any number of sweepers, in any number of processes, may work the same
/// queue; each request is delivered to at most one of them.
pub struct Sweeper<'g, S, L: ?Sized> {
    graph: &'g BindGraph<S>,
    lifecycle: &'g L,
}

impl<'g, S, L> Sweeper<'g, S, L>
where
    S: Transactional,
    L: ResourceLifecycle + ?Sized,
{
    pub fn new(graph: &'g BindGraph<S>, lifecycle: &'g L) -> Self {
        Self { graph, lifecycle }
    }

    /// Handle the oldest cleanup request.
    ///
    /// A lifecycle error rolls back the deletion of that resource and is
    /// reported as [`SweepOutcome::Failed`]; store errors are returned.
    pub fn sweep_one(&self) -> GraphResult<SweepOutcome> {
        let Some(resource) = self.graph.pop_next()? else {
            return Ok(SweepOutcome::Idle);
        };

        let outcome = self.graph.store().transaction(|txn| -> GraphResult<SweepOutcome> {
            match self.graph.reclaim_if_orphaned(txn, resource, self.lifecycle)? {
                Reclaimed::Kept => Ok(SweepOutcome::Kept(resource)),
                Reclaimed::Deleted(members) => {
                    txn.enqueue(&members)?;
                    Ok(SweepOutcome::Deleted {
                        resource,
                        children: members.len(),
                    })
                }
            }
        });

        match outcome {
            Ok(SweepOutcome::Deleted { resource, children }) => {
                info!(%resource, children, "swept orphaned resource");
            }
            Ok(SweepOutcome::Kept(resource)) => {
                debug!(%resource, "resource still reachable");
            }
            Ok(_) => {}
            Err(GraphError::Lifecycle { resource, message }) => {
                warn!(%resource, error = %message, "lifecycle refused deletion, request dropped");
                return Ok(SweepOutcome::Failed(resource));
            }
            Err(e) => {
                warn!(%resource, error = %e, "sweep failed");
                return Err(e);
            }
        }
        outcome
    }

    /// Sweep until the queue is empty or `limit` requests were handled.
    pub fn drain(&self, limit: usize) -> GraphResult<SweepReport> {
        let mut report = SweepReport::default();
        while report.examined < limit {
            match self.sweep_one()? {
                SweepOutcome::Idle => break,
                outcome => report.record(outcome),
            }
        }
        Ok(report)
    }

    /// Sweep in batches of the configured size until `stop` is set,
    /// sleeping the configured interval whenever the queue is empty.
    ///
    /// Errors are logged and retried after the interval.
    pub fn run(&self, stop: &AtomicBool) -> SweepReport {
        let config = self.graph.config();
        let mut total = SweepReport::default();
        info!(interval_ms = config.sweep_interval_ms, "sweeper started");

        while !stop.load(Ordering::Relaxed) {
            match self.drain(config.sweep_batch) {
                Ok(report) => {
                    total.merge(report);
                    if report.examined < config.sweep_batch {
                        thread::sleep(config.sweep_interval());
                    }
                }
                Err(_) => thread::sleep(config.sweep_interval()),
            }
        }

        info!(
            examined = total.examined,
            deleted = total.deleted,
            kept = total.kept,
            failed = total.failed,
            "sweeper stopped"
        );
        total
    }
}
