//! The collaborator that owns resource content.
//!
//! The bind graph never creates or destroys resources; it only decides when
//! one has become unreachable. Deleting the resource itself (body, metadata,
//! properties) is delegated through [`ResourceLifecycle`].

use std::error::Error;

use tracing::info;

use bindgraph_types::ResourceId;

/// Boxed error returned by a lifecycle collaborator.
pub type LifecycleError = Box<dyn Error + Send + Sync>;

/// Deletes resources the sweeper has proven unreachable.
pub trait ResourceLifecycle: Send + Sync {
    /// Destroy everything stored for `resource` outside the bind graph.
    ///
    /// Called inside the transaction that removes the resource's binds; an
    /// error rolls those removals back. The sweeper then drops the request,
    /// while an unbind reclaiming inline fails as a whole.
    fn delete_resource(&self, resource: ResourceId) -> Result<(), LifecycleError>;
}

/// A lifecycle that only logs. For graphs whose resources live nowhere else.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLifecycle;

impl ResourceLifecycle for NoopLifecycle {
    fn delete_resource(&self, resource: ResourceId) -> Result<(), LifecycleError> {
        info!(%resource, "resource released");
        Ok(())
    }
}

impl<L: ResourceLifecycle + ?Sized> ResourceLifecycle for &L {
    fn delete_resource(&self, resource: ResourceId) -> Result<(), LifecycleError> {
        (**self).delete_resource(resource)
    }
}
