//! Live status of the recorded resources

use crate::driver::{
    BucketDriver, DatabaseDriver, InstanceDriver, ResourceDriver, RoleDriver, SecurityGroupDriver,
};
use crate::error::Result;
use crate::provider::{CloudProvider, ResourceHandle, ResourceKind, ResourceStatus};
use crate::state::{DeploymentRecord, RecordKey};

/// Ask the provider about every resource the record names
///
/// Only the resources with a `describe` are listed; subnet groups and the
/// instance profile follow the database and the role.
pub async fn inspect<P: CloudProvider + ?Sized>(
    provider: &P,
    record: &DeploymentRecord,
) -> Result<Vec<ResourceHandle>> {
    let mut handles = Vec::new();

    if let Some(id) = record.get(RecordKey::Instance) {
        let status = InstanceDriver::new(provider).describe(id).await?;
        handles.push(ResourceHandle::new(ResourceKind::Instance, id, status));
    }
    if let Some(id) = record.get(RecordKey::DbInstance) {
        let status = DatabaseDriver::new(provider).describe(id).await?;
        handles.push(ResourceHandle::new(ResourceKind::Database, id, status));
    }
    if let Some(id) = record.get(RecordKey::Bucket) {
        let status = BucketDriver::new(provider).describe(id).await?;
        handles.push(ResourceHandle::new(ResourceKind::Bucket, id, status));
    }
    if let Some(id) = record.get(RecordKey::Role) {
        let status = RoleDriver::new(provider).describe(id).await?;
        handles.push(ResourceHandle::new(ResourceKind::IdentityRole, id, status));
    }

    let groups = SecurityGroupDriver::new(provider);
    for key in [RecordKey::WebSecurityGroup, RecordKey::DbSecurityGroup] {
        if let Some(id) = record.get(key) {
            let status = groups.describe(id).await?;
            handles.push(ResourceHandle::new(ResourceKind::SecurityGroup, id, status));
        }
    }

    tracing::debug!(
        "{} of {} recorded resources available",
        handles
            .iter()
            .filter(|h| h.status == ResourceStatus::Available)
            .count(),
        handles.len()
    );
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;
    use crate::provider::BucketApi;

    #[tokio::test]
    async fn test_inspect_reports_missing_as_absent() {
        let provider = MemoryProvider::new("us-east-1");
        provider.create_bucket("portfolio-app-1700000000").await.unwrap();

        let mut record = DeploymentRecord::new();
        record
            .insert(RecordKey::Bucket, "portfolio-app-1700000000")
            .unwrap();
        record.insert(RecordKey::Instance, "i-0001").unwrap();

        let handles = inspect(&provider, &record).await.unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].kind, ResourceKind::Instance);
        assert_eq!(handles[0].status, ResourceStatus::Absent);
        assert_eq!(handles[1].status, ResourceStatus::Available);
    }
}
