use super::{DeleteOutcome, ResourceDriver, create_or_reuse};
use crate::error::{CloudError, Result};
use crate::provider::{IdentityApi, ResourceKind, ResourceStatus};
use async_trait::async_trait;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct RoleSpec {
    pub name: String,
    /// Name of the inline S3 policy
    pub policy_name: String,
    /// Bucket the instance is allowed to use
    pub bucket: String,
}

/// Identity role assumed by the compute instance
pub struct RoleDriver<'a, P: ?Sized> {
    api: &'a P,
}

impl<'a, P: IdentityApi + ?Sized> RoleDriver<'a, P> {
    pub fn new(api: &'a P) -> Self {
        Self { api }
    }

    /// Make sure `profile` exists and carries `role`
    pub async fn ensure_instance_profile(&self, profile: &str, role: &str) -> Result<String> {
        let existing = match self.api.get_instance_profile(profile).await? {
            Some(info) => {
                tracing::info!("Instance profile {} already exists, reusing", profile);
                Some(info)
            }
            None => match self.api.create_instance_profile(profile).await {
                Ok(_) => {
                    tracing::info!("Created instance profile {}", profile);
                    None
                }
                Err(e) if e.is_already_exists() => self.api.get_instance_profile(profile).await?,
                Err(e) => return Err(e),
            },
        };

        let roles = existing.map(|info| info.roles).unwrap_or_default();
        if roles.iter().any(|r| r == role) {
            return Ok(profile.to_string());
        }
        if !roles.is_empty() {
            return Err(foreign_role(profile, &roles));
        }

        match self.api.add_role_to_instance_profile(profile, role).await {
            Ok(()) => tracing::debug!("Attached {} to {}", role, profile),
            // A profile holds one role; only ours is acceptable
            Err(e) if e.is_already_exists() => {
                let roles = self
                    .api
                    .get_instance_profile(profile)
                    .await?
                    .map(|info| info.roles)
                    .unwrap_or_default();
                if !roles.iter().any(|r| r == role) {
                    return Err(foreign_role(profile, &roles));
                }
            }
            Err(e) => return Err(e),
        }

        Ok(profile.to_string())
    }

    pub async fn detach_from_profile(&self, profile: &str, role: &str) -> Result<DeleteOutcome> {
        DeleteOutcome::from_result(
            self.api
                .remove_role_from_instance_profile(profile, role)
                .await,
        )
    }

    pub async fn delete_profile(&self, profile: &str) -> Result<DeleteOutcome> {
        DeleteOutcome::from_result(self.api.delete_instance_profile(profile).await)
    }

    pub async fn delete_inline_policy(&self, role: &str, policy_name: &str) -> Result<DeleteOutcome> {
        DeleteOutcome::from_result(self.api.delete_role_policy(role, policy_name).await)
    }

    /// Delete every inline policy the role carries, whatever its name
    ///
    /// `AlreadyAbsent` when the role is gone or has no inline policies.
    pub async fn delete_inline_policies(&self, role: &str) -> Result<DeleteOutcome> {
        let names = match self.api.list_role_policies(role).await {
            Ok(names) => names,
            Err(e) if e.is_not_found() => return Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => return Err(e),
        };

        let mut outcome = DeleteOutcome::AlreadyAbsent;
        for name in &names {
            if self.delete_inline_policy(role, name).await? == DeleteOutcome::Deleted {
                tracing::debug!("Deleted inline policy {} of {}", name, role);
                outcome = DeleteOutcome::Deleted;
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl<'a, P: IdentityApi + ?Sized> ResourceDriver for RoleDriver<'a, P> {
    type Spec = RoleSpec;

    const KIND: ResourceKind = ResourceKind::IdentityRole;

    /// Create (or reuse) the role, then put its bucket policy
    ///
    /// The inline policy is a put, so running this again converges instead
    /// of failing.
    async fn create(&self, spec: &RoleSpec) -> Result<String> {
        let name = match self.api.get_role(&spec.name).await? {
            Some(role) => {
                tracing::info!("Role {} already exists, reusing", role.name);
                role.name
            }
            None => {
                let assume = assume_role_policy();
                create_or_reuse(
                    Self::KIND,
                    &spec.name,
                    move || async move {
                        Ok(self.api.create_role(&spec.name, &assume).await?.name)
                    },
                    move || async move {
                        Ok(self.api.get_role(&spec.name).await?.map(|r| r.name))
                    },
                )
                .await?
            }
        };

        self.api
            .put_role_policy(&name, &spec.policy_name, &bucket_access_policy(&spec.bucket))
            .await?;

        Ok(name)
    }

    async fn describe(&self, id: &str) -> Result<ResourceStatus> {
        Ok(match self.api.get_role(id).await? {
            Some(_) => ResourceStatus::Available,
            None => ResourceStatus::Absent,
        })
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        DeleteOutcome::from_result(self.api.delete_role(id).await)
    }
}

fn foreign_role(profile: &str, roles: &[String]) -> CloudError {
    CloudError::api(
        "add_role_to_instance_profile",
        format!(
            "instance profile {} already carries role {}",
            profile,
            roles.join(", ")
        ),
    )
}

/// Trust policy letting EC2 instances assume the role
fn assume_role_policy() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ec2.amazonaws.com" },
            "Action": "sts:AssumeRole",
        }]
    })
    .to_string()
}

/// Read/write access to one bucket and its objects
fn bucket_access_policy(bucket: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject", "s3:ListBucket"],
            "Resource": [
                format!("arn:aws:s3:::{}", bucket),
                format!("arn:aws:s3:::{}/*", bucket),
            ],
        }]
    })
    .to_string()
}
