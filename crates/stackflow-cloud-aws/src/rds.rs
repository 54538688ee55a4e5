//! RDS subnet group and database instance operations

use crate::error::{found, sdk_error};
use crate::provider::AwsProvider;
use async_trait::async_trait;
use aws_sdk_rds::types::DbInstance;
use stackflow_cloud::provider::{DatabaseSpec, DbInstanceInfo};
use stackflow_cloud::{DatabaseApi, Result};

fn db_instance_info(instance: &DbInstance) -> Option<DbInstanceInfo> {
    Some(DbInstanceInfo {
        identifier: instance.db_instance_identifier()?.to_string(),
        status: instance
            .db_instance_status()
            .unwrap_or("unknown")
            .to_string(),
        endpoint: instance
            .endpoint()
            .and_then(|e| e.address())
            .map(str::to_string),
    })
}

#[async_trait]
impl DatabaseApi for AwsProvider {
    async fn db_subnet_group_exists(&self, name: &str) -> Result<bool> {
        let output = found(
            self.rds
                .describe_db_subnet_groups()
                .db_subnet_group_name(name)
                .send()
                .await
                .map_err(|e| sdk_error("describe_db_subnet_groups", e)),
        )?;
        Ok(output.is_some_and(|o| !o.db_subnet_groups().is_empty()))
    }

    async fn create_db_subnet_group(&self, name: &str, subnet_ids: &[String]) -> Result<()> {
        tracing::debug!(
            "rds:CreateDBSubnetGroup {} over {} subnet(s)",
            name,
            subnet_ids.len()
        );
        self.rds
            .create_db_subnet_group()
            .db_subnet_group_name(name)
            .db_subnet_group_description("stackflow database subnets")
            .set_subnet_ids(Some(subnet_ids.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("create_db_subnet_group", e))?;
        Ok(())
    }

    async fn delete_db_subnet_group(&self, name: &str) -> Result<()> {
        self.rds
            .delete_db_subnet_group()
            .db_subnet_group_name(name)
            .send()
            .await
            .map_err(|e| sdk_error("delete_db_subnet_group", e))?;
        Ok(())
    }

    async fn describe_db_instance(&self, identifier: &str) -> Result<Option<DbInstanceInfo>> {
        let output = found(
            self.rds
                .describe_db_instances()
                .db_instance_identifier(identifier)
                .send()
                .await
                .map_err(|e| sdk_error("describe_db_instances", e)),
        )?;

        Ok(output.and_then(|o| o.db_instances().iter().find_map(db_instance_info)))
    }

    async fn create_db_instance(&self, spec: &DatabaseSpec) -> Result<()> {
        tracing::debug!(
            "rds:CreateDBInstance {} ({} {})",
            spec.identifier,
            spec.engine,
            spec.instance_class
        );
        self.rds
            .create_db_instance()
            .db_instance_identifier(&spec.identifier)
            .engine(&spec.engine)
            .set_engine_version(spec.engine_version.clone())
            .db_instance_class(&spec.instance_class)
            .allocated_storage(spec.allocated_storage)
            .db_name(&spec.db_name)
            .master_username(&spec.username)
            .master_user_password(&spec.password)
            .port(i32::from(spec.port))
            .vpc_security_group_ids(&spec.security_group_id)
            .db_subnet_group_name(&spec.subnet_group)
            .publicly_accessible(false)
            .send()
            .await
            .map_err(|e| sdk_error("create_db_instance", e))?;
        Ok(())
    }

    async fn delete_db_instance(&self, identifier: &str) -> Result<()> {
        tracing::debug!("rds:DeleteDBInstance {} (skip final snapshot)", identifier);
        self.rds
            .delete_db_instance()
            .db_instance_identifier(identifier)
            .skip_final_snapshot(true)
            .delete_automated_backups(true)
            .send()
            .await
            .map_err(|e| sdk_error("delete_db_instance", e))?;
        Ok(())
    }
}
