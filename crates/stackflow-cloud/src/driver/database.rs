use super::{DeleteOutcome, ResourceDriver, create_or_reuse, not_ready};
use crate::error::Result;
use crate::provider::{DatabaseApi, DatabaseSpec, ResourceKind, ResourceStatus};
use async_trait::async_trait;

/// Managed database instance and its subnet group
pub struct DatabaseDriver<'a, P: ?Sized> {
    api: &'a P,
}

impl<'a, P: DatabaseApi + ?Sized> DatabaseDriver<'a, P> {
    pub fn new(api: &'a P) -> Self {
        Self { api }
    }

    /// Subnet group spanning the given subnets, created when missing
    pub async fn ensure_subnet_group(&self, name: &str, subnet_ids: &[String]) -> Result<String> {
        if self.api.db_subnet_group_exists(name).await? {
            tracing::info!("DB subnet group {} already exists, reusing", name);
            return Ok(name.to_string());
        }

        create_or_reuse(
            ResourceKind::DbSubnetGroup,
            name,
            move || async move {
                self.api.create_db_subnet_group(name, subnet_ids).await?;
                Ok(name.to_string())
            },
            move || async move {
                Ok(self
                    .api
                    .db_subnet_group_exists(name)
                    .await?
                    .then(|| name.to_string()))
            },
        )
        .await
    }

    pub async fn delete_subnet_group(&self, name: &str) -> Result<DeleteOutcome> {
        DeleteOutcome::from_result(self.api.delete_db_subnet_group(name).await)
    }

    /// Endpoint address; only known once the instance is available
    pub async fn endpoint(&self, identifier: &str) -> Result<String> {
        self.api
            .describe_db_instance(identifier)
            .await?
            .filter(|info| {
                ResourceStatus::from_database_status(&info.status) == ResourceStatus::Available
            })
            .and_then(|info| info.endpoint)
            .ok_or_else(|| not_ready(Self::KIND, identifier, "endpoint"))
    }
}

#[async_trait]
impl<'a, P: DatabaseApi + ?Sized> ResourceDriver for DatabaseDriver<'a, P> {
    type Spec = DatabaseSpec;

    const KIND: ResourceKind = ResourceKind::Database;

    async fn create(&self, spec: &DatabaseSpec) -> Result<String> {
        if let Some(info) = self.api.describe_db_instance(&spec.identifier).await? {
            tracing::info!(
                "Database {} already exists ({}), reusing",
                info.identifier,
                info.status
            );
            return Ok(info.identifier);
        }

        create_or_reuse(
            Self::KIND,
            &spec.identifier,
            move || async move {
                self.api.create_db_instance(spec).await?;
                Ok(spec.identifier.clone())
            },
            move || async move {
                Ok(self
                    .api
                    .describe_db_instance(&spec.identifier)
                    .await?
                    .map(|info| info.identifier))
            },
        )
        .await
    }

    async fn describe(&self, id: &str) -> Result<ResourceStatus> {
        Ok(match self.api.describe_db_instance(id).await? {
            Some(info) => ResourceStatus::from_database_status(&info.status),
            None => ResourceStatus::Absent,
        })
    }

    /// An instance that is already deleting counts as deleted; the caller
    /// waits for it to disappear either way
    async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        match self.describe(id).await? {
            ResourceStatus::Absent => return Ok(DeleteOutcome::AlreadyAbsent),
            ResourceStatus::Deleting => {
                tracing::debug!("Database {} is already being deleted", id);
                return Ok(DeleteOutcome::Deleted);
            }
            _ => {}
        }
        DeleteOutcome::from_result(self.api.delete_db_instance(id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBehavior, MemoryProvider};
    use crate::provider::NetworkApi;
    use stackflow_config::WaitConfig;

    const FAST: WaitConfig = WaitConfig::new(5, 1);

    async fn spec(provider: &MemoryProvider) -> DatabaseSpec {
        let vpc = provider.default_vpc_id().await.unwrap();
        let subnets = provider.subnet_ids(&vpc).await.unwrap();
        let group = provider
            .create_security_group(&vpc, "db-sg", "db")
            .await
            .unwrap();
        DatabaseDriver::new(provider)
            .ensure_subnet_group("db-subnets", &subnets)
            .await
            .unwrap();

        DatabaseSpec {
            identifier: "portfolio-app-db-1700000000".to_string(),
            engine: "postgres".to_string(),
            engine_version: None,
            instance_class: "db.t3.micro".to_string(),
            allocated_storage: 20,
            db_name: "portfolio".to_string(),
            username: "portfolio_admin".to_string(),
            password: "s3cretpassword".to_string(),
            port: 5432,
            security_group_id: group,
            subnet_group: "db-subnets".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_twice_returns_same_identifier() {
        let provider = MemoryProvider::new("us-east-1");
        let driver = DatabaseDriver::new(&provider);
        let spec = spec(&provider).await;

        let first = driver.create(&spec).await.unwrap();
        let second = driver.create(&spec).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.call_count("create_db_instance").await, 1);
    }

    #[tokio::test]
    async fn test_wait_then_endpoint() {
        let provider = MemoryProvider::with_behavior(
            "us-east-1",
            MemoryBehavior {
                database_ready_after: Some(3),
                ..Default::default()
            },
        );
        let driver = DatabaseDriver::new(&provider);
        let id = driver.create(&spec(&provider).await).await.unwrap();

        assert!(driver.endpoint(&id).await.is_err());
        driver
            .wait_until(&id, ResourceStatus::Available, &FAST)
            .await
            .unwrap();
        assert_eq!(
            driver.endpoint(&id).await.unwrap(),
            "portfolio-app-db-1700000000.memory.rds.local"
        );
    }

    #[tokio::test]
    async fn test_never_available_times_out() {
        let provider = MemoryProvider::with_behavior(
            "us-east-1",
            MemoryBehavior {
                database_ready_after: None,
                ..Default::default()
            },
        );
        let driver = DatabaseDriver::new(&provider);
        let id = driver.create(&spec(&provider).await).await.unwrap();

        let result = driver
            .wait_until(&id, ResourceStatus::Available, &FAST)
            .await;
        assert!(matches!(
            result,
            Err(crate::CloudError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_waits_then_subnet_group() {
        let provider = MemoryProvider::with_behavior(
            "us-east-1",
            MemoryBehavior {
                deletion_polls: 2,
                ..Default::default()
            },
        );
        let driver = DatabaseDriver::new(&provider);
        let id = driver.create(&spec(&provider).await).await.unwrap();

        assert_eq!(driver.delete(&id).await.unwrap(), DeleteOutcome::Deleted);
        // Still in use while the instance is deleting
        assert!(driver.delete_subnet_group("db-subnets").await.is_err());

        driver
            .wait_until(&id, ResourceStatus::Deleted, &FAST)
            .await
            .unwrap();
        assert_eq!(
            driver.delete_subnet_group("db-subnets").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            driver.delete(&id).await.unwrap(),
            DeleteOutcome::AlreadyAbsent
        );
    }
}
