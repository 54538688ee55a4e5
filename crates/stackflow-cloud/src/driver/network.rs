use super::{DeleteOutcome, ResourceDriver, create_or_reuse};
use crate::error::Result;
use crate::provider::{IngressRule, NetworkApi, ResourceKind, ResourceStatus};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct SecurityGroupSpec {
    pub vpc_id: String,
    pub name: String,
    pub description: String,
    pub rules: Vec<IngressRule>,
}

/// Security group in the default VPC
pub struct SecurityGroupDriver<'a, P: ?Sized> {
    api: &'a P,
}

impl<'a, P: NetworkApi + ?Sized> SecurityGroupDriver<'a, P> {
    pub fn new(api: &'a P) -> Self {
        Self { api }
    }

    pub async fn default_vpc(&self) -> Result<String> {
        self.api.default_vpc_id().await
    }

    pub async fn subnets(&self, vpc_id: &str) -> Result<Vec<String>> {
        self.api.subnet_ids(vpc_id).await
    }

    /// Add an ingress rule; an identical rule already present is fine
    pub async fn allow(&self, group_id: &str, rule: &IngressRule) -> Result<()> {
        match self.api.authorize_ingress(group_id, rule).await {
            Ok(()) => {
                tracing::debug!("Allowed port {} on {}", rule.port, group_id);
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!("Port {} on {} was already allowed", rule.port, group_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<'a, P: NetworkApi + ?Sized> ResourceDriver for SecurityGroupDriver<'a, P> {
    type Spec = SecurityGroupSpec;

    const KIND: ResourceKind = ResourceKind::SecurityGroup;

    async fn create(&self, spec: &SecurityGroupSpec) -> Result<String> {
        let group_id = match self.api.find_security_group(&spec.vpc_id, &spec.name).await? {
            Some(id) => {
                tracing::info!("Security group {} already exists ({}), reusing", spec.name, id);
                id
            }
            None => {
                create_or_reuse(
                    Self::KIND,
                    &spec.name,
                    move || async move {
                        self.api
                            .create_security_group(&spec.vpc_id, &spec.name, &spec.description)
                            .await
                    },
                    move || async move {
                        self.api.find_security_group(&spec.vpc_id, &spec.name).await
                    },
                )
                .await?
            }
        };

        for rule in &spec.rules {
            self.allow(&group_id, rule).await?;
        }

        Ok(group_id)
    }

    async fn describe(&self, id: &str) -> Result<ResourceStatus> {
        Ok(if self.api.security_group_exists(id).await? {
            ResourceStatus::Available
        } else {
            ResourceStatus::Absent
        })
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        DeleteOutcome::from_result(self.api.delete_security_group(id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;

    #[tokio::test]
    async fn test_create_twice_returns_same_id() {
        let provider = MemoryProvider::new("us-east-1");
        let driver = SecurityGroupDriver::new(&provider);
        let vpc_id = driver.default_vpc().await.unwrap();

        let spec = SecurityGroupSpec {
            vpc_id,
            name: "portfolio-app-web-sg".to_string(),
            description: "web".to_string(),
            rules: vec![
                IngressRule::from_cidr(22, "0.0.0.0/0"),
                IngressRule::from_cidr(80, "0.0.0.0/0"),
            ],
        };

        let first = driver.create(&spec).await.unwrap();
        let second = driver.create(&spec).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.call_count("create_security_group").await, 1);
        // Duplicate rules on the second run are tolerated, not duplicated
        assert_eq!(provider.ingress_rules(&first).await.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_missing_is_already_absent() {
        let provider = MemoryProvider::new("us-east-1");
        let driver = SecurityGroupDriver::new(&provider);
        assert_eq!(
            driver.delete("sg-9999").await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
    }
}
