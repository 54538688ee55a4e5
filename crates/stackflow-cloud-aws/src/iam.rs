//! IAM role, inline policy and instance profile operations

use crate::error::{found, sdk_error};
use crate::provider::AwsProvider;
use async_trait::async_trait;
use aws_sdk_iam::error::ProvideErrorMetadata;
use aws_sdk_iam::types::{InstanceProfile, Role};
use stackflow_cloud::provider::{InstanceProfileInfo, RoleInfo};
use stackflow_cloud::{CloudError, IdentityApi, Result};

fn role_info(role: &Role) -> RoleInfo {
    RoleInfo {
        name: role.role_name().to_string(),
        arn: role.arn().to_string(),
    }
}

fn profile_info(profile: &InstanceProfile) -> InstanceProfileInfo {
    InstanceProfileInfo {
        name: profile.instance_profile_name().to_string(),
        arn: profile.arn().to_string(),
        roles: profile
            .roles()
            .iter()
            .map(|r| r.role_name().to_string())
            .collect(),
    }
}

#[async_trait]
impl IdentityApi for AwsProvider {
    async fn get_role(&self, name: &str) -> Result<Option<RoleInfo>> {
        let output = found(
            self.iam
                .get_role()
                .role_name(name)
                .send()
                .await
                .map_err(|e| sdk_error("get_role", e)),
        )?;
        Ok(output.and_then(|o| o.role().map(role_info)))
    }

    async fn create_role(&self, name: &str, assume_role_policy: &str) -> Result<RoleInfo> {
        tracing::debug!("iam:CreateRole {}", name);
        let output = self
            .iam
            .create_role()
            .role_name(name)
            .assume_role_policy_document(assume_role_policy)
            .description("stackflow application instance role")
            .send()
            .await
            .map_err(|e| sdk_error("create_role", e))?;

        output
            .role()
            .map(role_info)
            .ok_or_else(|| CloudError::api("create_role", "response carried no role"))
    }

    async fn put_role_policy(&self, role: &str, policy_name: &str, document: &str) -> Result<()> {
        self.iam
            .put_role_policy()
            .role_name(role)
            .policy_name(policy_name)
            .policy_document(document)
            .send()
            .await
            .map_err(|e| sdk_error("put_role_policy", e))?;
        Ok(())
    }

    async fn list_role_policies(&self, role: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .iam
                .list_role_policies()
                .role_name(role)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| sdk_error("list_role_policies", e))?;

            names.extend(output.policy_names().iter().cloned());

            // IAM only returns a marker when the listing is truncated
            match output.marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> Result<()> {
        self.iam
            .delete_role_policy()
            .role_name(role)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| sdk_error("delete_role_policy", e))?;
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        tracing::debug!("iam:DeleteRole {}", name);
        self.iam
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| sdk_error("delete_role", e))?;
        Ok(())
    }

    async fn get_instance_profile(&self, name: &str) -> Result<Option<InstanceProfileInfo>> {
        let output = found(
            self.iam
                .get_instance_profile()
                .instance_profile_name(name)
                .send()
                .await
                .map_err(|e| sdk_error("get_instance_profile", e)),
        )?;
        Ok(output.and_then(|o| o.instance_profile().map(profile_info)))
    }

    async fn create_instance_profile(&self, name: &str) -> Result<InstanceProfileInfo> {
        tracing::debug!("iam:CreateInstanceProfile {}", name);
        let output = self
            .iam
            .create_instance_profile()
            .instance_profile_name(name)
            .send()
            .await
            .map_err(|e| sdk_error("create_instance_profile", e))?;

        output.instance_profile().map(profile_info).ok_or_else(|| {
            CloudError::api("create_instance_profile", "response carried no profile")
        })
    }

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> Result<()> {
        match self
            .iam
            .add_role_to_instance_profile()
            .instance_profile_name(profile)
            .role_name(role)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            // A profile holds at most one role
            Err(e) if e.as_service_error().and_then(|s| s.code()) == Some("LimitExceeded") => {
                Err(CloudError::ResourceAlreadyExists(format!(
                    "instance profile {} already has a role",
                    profile
                )))
            }
            Err(e) => Err(sdk_error("add_role_to_instance_profile", e)),
        }
    }

    async fn remove_role_from_instance_profile(&self, profile: &str, role: &str) -> Result<()> {
        self.iam
            .remove_role_from_instance_profile()
            .instance_profile_name(profile)
            .role_name(role)
            .send()
            .await
            .map_err(|e| sdk_error("remove_role_from_instance_profile", e))?;
        Ok(())
    }

    async fn delete_instance_profile(&self, name: &str) -> Result<()> {
        self.iam
            .delete_instance_profile()
            .instance_profile_name(name)
            .send()
            .await
            .map_err(|e| sdk_error("delete_instance_profile", e))?;
        Ok(())
    }
}
