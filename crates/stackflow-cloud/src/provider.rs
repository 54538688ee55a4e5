//! Cloud provider trait definitions
//!
//! The orchestrators never talk to a cloud SDK directly. Each resource family
//! is reached through one of the `*Api` traits below, and [`CloudProvider`]
//! bundles them with the caller-identity check. `stackflow-cloud-aws` provides
//! the AWS implementation and [`crate::memory::MemoryProvider`] a simulated one.
//!
//! Conventions every implementation follows:
//! - lookups return `Ok(None)` when the resource does not exist;
//! - mutations on a missing resource return [`CloudError::ResourceNotFound`];
//! - creations of a name that is taken return
//!   [`CloudError::ResourceAlreadyExists`].
//!
//! [`CloudError::ResourceNotFound`]: crate::CloudError::ResourceNotFound
//! [`CloudError::ResourceAlreadyExists`]: crate::CloudError::ResourceAlreadyExists

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything the orchestrators need from a provider
#[async_trait]
pub trait CloudProvider: BucketApi + IdentityApi + NetworkApi + DatabaseApi + ComputeApi {
    /// Returns the provider name (e.g., "aws", "memory")
    fn name(&self) -> &str;

    /// Region all calls are made against
    fn region(&self) -> &str;

    /// Verify credentials by asking the provider who we are
    async fn check_auth(&self) -> Result<AuthStatus>;
}

/// Object storage
#[async_trait]
pub trait BucketApi: Send + Sync {
    async fn bucket_exists(&self, name: &str) -> Result<bool>;

    async fn create_bucket(&self, name: &str) -> Result<()>;

    /// Turn the account/bucket level public-access block on or off
    async fn set_public_access_block(&self, name: &str, blocked: bool) -> Result<()>;

    async fn put_bucket_policy(&self, name: &str, policy: &str) -> Result<()>;

    /// Delete every object; returns the number of objects removed
    async fn empty_bucket(&self, name: &str) -> Result<usize>;

    async fn delete_bucket(&self, name: &str) -> Result<()>;
}

/// Identity roles, inline policies and instance profiles
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn get_role(&self, name: &str) -> Result<Option<RoleInfo>>;

    async fn create_role(&self, name: &str, assume_role_policy: &str) -> Result<RoleInfo>;

    async fn put_role_policy(&self, role: &str, policy_name: &str, document: &str) -> Result<()>;

    /// Names of the role's inline policies
    async fn list_role_policies(&self, role: &str) -> Result<Vec<String>>;

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> Result<()>;

    async fn delete_role(&self, name: &str) -> Result<()>;

    async fn get_instance_profile(&self, name: &str) -> Result<Option<InstanceProfileInfo>>;

    async fn create_instance_profile(&self, name: &str) -> Result<InstanceProfileInfo>;

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> Result<()>;

    async fn remove_role_from_instance_profile(&self, profile: &str, role: &str) -> Result<()>;

    async fn delete_instance_profile(&self, name: &str) -> Result<()>;
}

/// Virtual network lookups and security groups
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn default_vpc_id(&self) -> Result<String>;

    async fn subnet_ids(&self, vpc_id: &str) -> Result<Vec<String>>;

    async fn find_security_group(&self, vpc_id: &str, name: &str) -> Result<Option<String>>;

    async fn security_group_exists(&self, group_id: &str) -> Result<bool>;

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String>;

    /// A rule that is already present is reported as `ResourceAlreadyExists`
    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> Result<()>;

    async fn delete_security_group(&self, group_id: &str) -> Result<()>;
}

/// Managed relational database
#[async_trait]
pub trait DatabaseApi: Send + Sync {
    async fn db_subnet_group_exists(&self, name: &str) -> Result<bool>;

    async fn create_db_subnet_group(&self, name: &str, subnet_ids: &[String]) -> Result<()>;

    async fn delete_db_subnet_group(&self, name: &str) -> Result<()>;

    async fn describe_db_instance(&self, identifier: &str) -> Result<Option<DbInstanceInfo>>;

    async fn create_db_instance(&self, spec: &DatabaseSpec) -> Result<()>;

    /// Deletes without a final snapshot
    async fn delete_db_instance(&self, identifier: &str) -> Result<()>;
}

/// Compute instances and machine images
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Newest available image matching `name_filter` owned by `owner`
    async fn latest_image_id(&self, owner: &str, name_filter: &str) -> Result<String>;

    /// Non-terminated instance carrying the given `Name` tag
    async fn find_instance_by_name(&self, name: &str) -> Result<Option<InstanceInfo>>;

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<InstanceInfo>>;

    async fn run_instance(&self, spec: &InstanceSpec) -> Result<String>;

    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Kinds of resource in the fixed topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    IdentityRole,
    InstanceProfile,
    SecurityGroup,
    DbSubnetGroup,
    Database,
    Instance,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Bucket => write!(f, "bucket"),
            ResourceKind::IdentityRole => write!(f, "role"),
            ResourceKind::InstanceProfile => write!(f, "instance profile"),
            ResourceKind::SecurityGroup => write!(f, "security group"),
            ResourceKind::DbSubnetGroup => write!(f, "db subnet group"),
            ResourceKind::Database => write!(f, "database"),
            ResourceKind::Instance => write!(f, "instance"),
        }
    }
}

/// Status of a resource as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// The provider does not know the resource
    Absent,
    /// Resource is being created
    Creating,
    /// Resource is usable
    Available,
    /// Resource is being deleted
    Deleting,
    /// Resource has been deleted but is still listed
    Deleted,
    /// Terminal error state
    Failed,
}

impl ResourceStatus {
    /// Whether a wait for `target` is over once this status is observed
    pub fn satisfies(self, target: ResourceStatus) -> bool {
        match target {
            ResourceStatus::Deleted | ResourceStatus::Absent => {
                matches!(self, ResourceStatus::Deleted | ResourceStatus::Absent)
            }
            other => self == other,
        }
    }

    pub fn is_gone(self) -> bool {
        self.satisfies(ResourceStatus::Deleted)
    }

    /// Map an RDS-style database status string
    pub fn from_database_status(status: &str) -> Self {
        match status {
            "available" => ResourceStatus::Available,
            "deleting" => ResourceStatus::Deleting,
            "failed" | "incompatible-parameters" | "incompatible-restore"
            | "incompatible-network" | "incompatible-option-group" | "storage-full"
            | "inaccessible-encryption-credentials" => ResourceStatus::Failed,
            // creating, backing-up, modifying, configuring-enhanced-monitoring, ...
            _ => ResourceStatus::Creating,
        }
    }

    /// Map an EC2-style instance state name
    pub fn from_instance_state(state: &str) -> Self {
        match state {
            "pending" => ResourceStatus::Creating,
            "running" => ResourceStatus::Available,
            "shutting-down" | "stopping" | "stopped" => ResourceStatus::Deleting,
            "terminated" => ResourceStatus::Deleted,
            _ => ResourceStatus::Failed,
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Absent => write!(f, "absent"),
            ResourceStatus::Creating => write!(f, "creating"),
            ResourceStatus::Available => write!(f, "available"),
            ResourceStatus::Deleting => write!(f, "deleting"),
            ResourceStatus::Deleted => write!(f, "deleted"),
            ResourceStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A resource as seen at one point in time. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub id: String,
    pub status: ResourceStatus,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, id: impl Into<String>, status: ResourceStatus) -> Self {
        Self {
            kind,
            id: id.into(),
            status,
        }
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.id, self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceProfileInfo {
    pub name: String,
    pub arn: String,
    /// Names of the roles attached to the profile
    pub roles: Vec<String>,
}

/// Where an ingress rule admits traffic from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressSource {
    Cidr(String),
    SecurityGroup(String),
}

/// TCP ingress on a single port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub port: u16,
    pub source: IngressSource,
}

impl IngressRule {
    pub fn from_cidr(port: u16, cidr: impl Into<String>) -> Self {
        Self {
            port,
            source: IngressSource::Cidr(cidr.into()),
        }
    }

    pub fn from_group(port: u16, group_id: impl Into<String>) -> Self {
        Self {
            port,
            source: IngressSource::SecurityGroup(group_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbInstanceInfo {
    pub identifier: String,
    /// Raw provider status string
    pub status: String,
    /// Only known once the instance is available
    pub endpoint: Option<String>,
}

/// Parameters for a new database instance
#[derive(Debug, Clone)]
pub struct DatabaseSpec {
    pub identifier: String,
    pub engine: String,
    pub engine_version: Option<String>,
    pub instance_class: String,
    pub allocated_storage: i32,
    pub db_name: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub security_group_id: String,
    pub subnet_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: String,
    /// Raw provider state name
    pub state: String,
    pub public_ip: Option<String>,
}

/// Parameters for a new compute instance
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    /// Value of the `Name` tag
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub security_group_id: String,
    pub instance_profile: String,
    pub key_name: Option<String>,
    /// Rendered bootstrap payload (plain text, the provider encodes it)
    pub user_data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_target_accepts_absent() {
        assert!(ResourceStatus::Absent.satisfies(ResourceStatus::Deleted));
        assert!(ResourceStatus::Deleted.satisfies(ResourceStatus::Deleted));
        assert!(!ResourceStatus::Deleting.satisfies(ResourceStatus::Deleted));
        assert!(!ResourceStatus::Creating.satisfies(ResourceStatus::Available));
    }

    #[test]
    fn test_database_status_mapping() {
        assert_eq!(
            ResourceStatus::from_database_status("available"),
            ResourceStatus::Available
        );
        assert_eq!(
            ResourceStatus::from_database_status("backing-up"),
            ResourceStatus::Creating
        );
        assert_eq!(
            ResourceStatus::from_database_status("failed"),
            ResourceStatus::Failed
        );
    }

    #[test]
    fn test_instance_state_mapping() {
        assert_eq!(
            ResourceStatus::from_instance_state("pending"),
            ResourceStatus::Creating
        );
        assert_eq!(
            ResourceStatus::from_instance_state("running"),
            ResourceStatus::Available
        );
        assert_eq!(
            ResourceStatus::from_instance_state("terminated"),
            ResourceStatus::Deleted
        );
    }
}
