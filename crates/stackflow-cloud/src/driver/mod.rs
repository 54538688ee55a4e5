//! Resource drivers
//!
//! One driver per resource kind of the topology. Drivers sit between the
//! orchestrators and the provider traits and give every kind the same shape:
//! an existence-tolerant `create`, a `describe` that maps provider states to
//! [`ResourceStatus`], a `delete` that treats "already gone" as success, and a
//! bounded `wait_until`.

mod bucket;
mod database;
mod instance;
mod network;
mod role;

pub use bucket::{BucketDriver, BucketSpec};
pub use database::DatabaseDriver;
pub use instance::InstanceDriver;
pub use network::{SecurityGroupDriver, SecurityGroupSpec};
pub use role::{RoleDriver, RoleSpec};

use crate::error::{CloudError, Result};
use crate::provider::{ResourceKind, ResourceStatus};
use crate::wait::wait_for_status;
use async_trait::async_trait;
use stackflow_config::WaitConfig;

/// Result of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The provider did not know the resource
    AlreadyAbsent,
}

impl DeleteOutcome {
    /// Fold a provider answer into an outcome; `ResourceNotFound` means
    /// somebody else already removed it
    pub(crate) fn from_result(result: Result<()>) -> Result<Self> {
        match result {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.is_not_found() => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(e),
        }
    }
}

/// Common operations of every resource kind
#[async_trait]
pub trait ResourceDriver: Send + Sync {
    /// Parameters for creation
    type Spec: Send + Sync;

    const KIND: ResourceKind;

    /// Create the resource, or return the identifier of the one already
    /// there under the same name
    async fn create(&self, spec: &Self::Spec) -> Result<String>;

    /// Current status; `Absent` when the provider does not know it
    async fn describe(&self, id: &str) -> Result<ResourceStatus>;

    async fn delete(&self, id: &str) -> Result<DeleteOutcome>;

    /// Poll `describe` until `target` is reached
    async fn wait_until(
        &self,
        id: &str,
        target: ResourceStatus,
        config: &WaitConfig,
    ) -> Result<ResourceStatus> {
        let resource = format!("{} {}", Self::KIND, id);
        wait_for_status(&resource, target, config, move || self.describe(id)).await
    }
}

/// Run a create call and convert AlreadyExists into a re-lookup
///
/// `lookup` is asked again after the provider reported the name as taken;
/// if it still finds nothing the original error is returned.
pub(crate) async fn create_or_reuse<C, L, CF, LF>(
    kind: ResourceKind,
    name: &str,
    create: C,
    lookup: L,
) -> Result<String>
where
    C: FnOnce() -> CF,
    CF: std::future::Future<Output = Result<String>>,
    L: FnOnce() -> LF,
    LF: std::future::Future<Output = Result<Option<String>>>,
{
    match create().await {
        Ok(id) => {
            tracing::info!("Created {} {}", kind, id);
            Ok(id)
        }
        Err(err) if err.is_already_exists() => match lookup().await? {
            Some(id) => {
                tracing::info!("{} {} already exists, reusing", kind, name);
                Ok(id)
            }
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

pub(crate) fn not_ready(kind: ResourceKind, id: &str, what: &str) -> CloudError {
    CloudError::ResourceFailed {
        resource: format!("{} {}", kind, id),
        detail: format!("{} is not available yet", what),
    }
}
