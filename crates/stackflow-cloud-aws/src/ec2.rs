//! EC2 network and compute operations

use crate::error::{found, sdk_error};
use crate::provider::AwsProvider;
use async_trait::async_trait;
use aws_sdk_ec2::types::{
    Filter, IamInstanceProfileSpecification, Instance, InstanceType, IpPermission, IpRange,
    ResourceType, Tag, TagSpecification, UserIdGroupPair,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use stackflow_cloud::provider::{IngressRule, IngressSource, InstanceInfo, InstanceSpec};
use stackflow_cloud::{CloudError, ComputeApi, NetworkApi, Result};

/// Instance states that still count as a live instance
const LIVE_STATES: [&str; 4] = ["pending", "running", "stopping", "stopped"];

fn filter(name: &str, value: &str) -> Filter {
    Filter::builder().name(name).values(value).build()
}

fn ip_permission(rule: &IngressRule) -> IpPermission {
    let port = i32::from(rule.port);
    let builder = IpPermission::builder()
        .ip_protocol("tcp")
        .from_port(port)
        .to_port(port);
    let builder = match &rule.source {
        IngressSource::Cidr(cidr) => builder.ip_ranges(IpRange::builder().cidr_ip(cidr).build()),
        IngressSource::SecurityGroup(group) => {
            builder.user_id_group_pairs(UserIdGroupPair::builder().group_id(group).build())
        }
    };
    builder.build()
}

/// Newest image by creation date; the dates are ISO 8601 and sort as text
fn newest_image<'a>(images: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<&'a str> {
    images
        .into_iter()
        .max_by(|a, b| a.0.cmp(b.0))
        .map(|(_, id)| id)
}

fn encode_user_data(script: &str) -> String {
    STANDARD.encode(script)
}

fn instance_info(instance: &Instance) -> Option<InstanceInfo> {
    Some(InstanceInfo {
        id: instance.instance_id()?.to_string(),
        state: instance
            .state()
            .and_then(|s| s.name())
            .map(|n| n.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        public_ip: instance.public_ip_address().map(str::to_string),
    })
}

#[async_trait]
impl NetworkApi for AwsProvider {
    async fn default_vpc_id(&self) -> Result<String> {
        let output = self
            .ec2
            .describe_vpcs()
            .filters(filter("is-default", "true"))
            .send()
            .await
            .map_err(|e| sdk_error("describe_vpcs", e))?;

        output
            .vpcs()
            .iter()
            .find_map(|v| v.vpc_id())
            .map(str::to_string)
            .ok_or_else(|| CloudError::ResourceNotFound("default VPC".to_string()))
    }

    async fn subnet_ids(&self, vpc_id: &str) -> Result<Vec<String>> {
        let output = self
            .ec2
            .describe_subnets()
            .filters(filter("vpc-id", vpc_id))
            .send()
            .await
            .map_err(|e| sdk_error("describe_subnets", e))?;

        Ok(output
            .subnets()
            .iter()
            .filter_map(|s| s.subnet_id())
            .map(str::to_string)
            .collect())
    }

    async fn find_security_group(&self, vpc_id: &str, name: &str) -> Result<Option<String>> {
        let output = self
            .ec2
            .describe_security_groups()
            .filters(filter("vpc-id", vpc_id))
            .filters(filter("group-name", name))
            .send()
            .await
            .map_err(|e| sdk_error("describe_security_groups", e))?;

        Ok(output
            .security_groups()
            .iter()
            .find_map(|g| g.group_id())
            .map(str::to_string))
    }

    async fn security_group_exists(&self, group_id: &str) -> Result<bool> {
        let output = found(
            self.ec2
                .describe_security_groups()
                .group_ids(group_id)
                .send()
                .await
                .map_err(|e| sdk_error("describe_security_groups", e)),
        )?;
        Ok(output.is_some_and(|o| !o.security_groups().is_empty()))
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String> {
        tracing::debug!("ec2:CreateSecurityGroup {} in {}", name, vpc_id);
        let output = self
            .ec2
            .create_security_group()
            .vpc_id(vpc_id)
            .group_name(name)
            .description(description)
            .send()
            .await
            .map_err(|e| sdk_error("create_security_group", e))?;

        output
            .group_id()
            .map(str::to_string)
            .ok_or_else(|| CloudError::api("create_security_group", "response carried no group id"))
    }

    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> Result<()> {
        self.ec2
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(ip_permission(rule))
            .send()
            .await
            .map_err(|e| sdk_error("authorize_security_group_ingress", e))?;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        tracing::debug!("ec2:DeleteSecurityGroup {}", group_id);
        self.ec2
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(|e| sdk_error("delete_security_group", e))?;
        Ok(())
    }
}

#[async_trait]
impl ComputeApi for AwsProvider {
    async fn latest_image_id(&self, owner: &str, name_filter: &str) -> Result<String> {
        let output = self
            .ec2
            .describe_images()
            .owners(owner)
            .filters(filter("name", name_filter))
            .filters(filter("state", "available"))
            .send()
            .await
            .map_err(|e| sdk_error("describe_images", e))?;

        let candidates = output
            .images()
            .iter()
            .filter_map(|i| Some((i.creation_date()?, i.image_id()?)));
        newest_image(candidates)
            .map(str::to_string)
            .ok_or_else(|| {
                CloudError::ResourceNotFound(format!(
                    "image matching '{}' owned by {}",
                    name_filter, owner
                ))
            })
    }

    async fn find_instance_by_name(&self, name: &str) -> Result<Option<InstanceInfo>> {
        let output = self
            .ec2
            .describe_instances()
            .filters(filter("tag:Name", name))
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .set_values(Some(LIVE_STATES.iter().map(|s| s.to_string()).collect()))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("describe_instances", e))?;

        Ok(output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find_map(instance_info))
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Option<InstanceInfo>> {
        let output = found(
            self.ec2
                .describe_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(|e| sdk_error("describe_instances", e)),
        )?;

        Ok(output.and_then(|o| {
            o.reservations()
                .iter()
                .flat_map(|r| r.instances())
                .find_map(instance_info)
        }))
    }

    async fn run_instance(&self, spec: &InstanceSpec) -> Result<String> {
        tracing::debug!(
            "ec2:RunInstances {} ({}, {})",
            spec.name,
            spec.instance_type,
            spec.image_id
        );
        let output = self
            .ec2
            .run_instances()
            .image_id(&spec.image_id)
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .security_group_ids(&spec.security_group_id)
            .iam_instance_profile(
                IamInstanceProfileSpecification::builder()
                    .name(&spec.instance_profile)
                    .build(),
            )
            .set_key_name(spec.key_name.clone())
            .user_data(encode_user_data(&spec.user_data))
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .tags(Tag::builder().key("Name").value(&spec.name).build())
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("run_instances", e))?;

        output
            .instances()
            .iter()
            .find_map(|i| i.instance_id())
            .map(str::to_string)
            .ok_or_else(|| CloudError::api("run_instances", "response carried no instance"))
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        tracing::debug!("ec2:TerminateInstances {}", instance_id);
        self.ec2
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| sdk_error("terminate_instances", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_permission_from_cidr() {
        let permission = ip_permission(&IngressRule::from_cidr(22, "203.0.113.0/24"));
        assert_eq!(permission.ip_protocol(), Some("tcp"));
        assert_eq!(permission.from_port(), Some(22));
        assert_eq!(permission.to_port(), Some(22));
        assert_eq!(permission.ip_ranges()[0].cidr_ip(), Some("203.0.113.0/24"));
        assert!(permission.user_id_group_pairs().is_empty());
    }

    #[test]
    fn test_ip_permission_from_group() {
        let permission = ip_permission(&IngressRule::from_group(5432, "sg-0123"));
        assert_eq!(permission.from_port(), Some(5432));
        assert_eq!(
            permission.user_id_group_pairs()[0].group_id(),
            Some("sg-0123")
        );
        assert!(permission.ip_ranges().is_empty());
    }

    #[test]
    fn test_newest_image() {
        let images = [
            ("2024-01-10T00:00:00.000Z", "ami-old"),
            ("2024-06-01T12:00:00.000Z", "ami-new"),
            ("2024-03-15T00:00:00.000Z", "ami-mid"),
        ];
        assert_eq!(newest_image(images), Some("ami-new"));
        assert_eq!(newest_image(Vec::<(&str, &str)>::new()), None);
    }

    #[test]
    fn test_encode_user_data() {
        assert_eq!(encode_user_data("#!/bin/bash\n"), "IyEvYmluL2Jhc2gK");
    }
}
