//! Provisioning pipeline
//!
//! `Preflight → Bucket → IdentityRole → SecurityGroups → Database →
//! ComputeInstance → Finalize`. Every identifier is written to the record as
//! soon as the provider confirms it, so an interrupted run can always be torn
//! down. A failing stage stops the pipeline and leaves what exists in place.

use crate::action::{ProvisionReport, StepReport, StepResult};
use crate::bootstrap::{Bindings, BootstrapTemplate, Slot};
use crate::driver::{
    BucketDriver, BucketSpec, DatabaseDriver, InstanceDriver, ResourceDriver, RoleDriver,
    RoleSpec, SecurityGroupDriver, SecurityGroupSpec,
};
use crate::error::{CloudError, Result};
use crate::progress::{NoopObserver, StepObserver};
use crate::provider::{CloudProvider, DatabaseSpec, IngressRule, InstanceSpec, ResourceStatus};
use crate::state::{DeploymentRecord, RecordKey, StateStore};
use stackflow_config::DeployConfig;
use std::future::Future;
use std::time::Instant;

const ANYWHERE: &str = "0.0.0.0/0";
const HTTP_PORT: u16 = 80;

/// Stages of the provisioning pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preflight,
    Bucket,
    IdentityRole,
    SecurityGroups,
    Database,
    ComputeInstance,
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Preflight,
        Stage::Bucket,
        Stage::IdentityRole,
        Stage::SecurityGroups,
        Stage::Database,
        Stage::ComputeInstance,
        Stage::Finalize,
    ];

    /// Stage ID used in logs and errors
    pub fn id(&self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Bucket => "bucket",
            Self::IdentityRole => "identity-role",
            Self::SecurityGroups => "security-groups",
            Self::Database => "database",
            Self::ComputeInstance => "compute-instance",
            Self::Finalize => "finalize",
        }
    }

    /// Position among the resource stages (bucket is 1); 0 for preflight
    pub fn number(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or_default()
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Preflight => "Checking credentials and configuration",
            Self::Bucket => "Creating storage bucket",
            Self::IdentityRole => "Creating role and instance profile",
            Self::SecurityGroups => "Creating security groups",
            Self::Database => "Creating database",
            Self::ComputeInstance => "Launching compute instance",
            Self::Finalize => "Finalizing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Runs the provisioning pipeline against one provider
pub struct Provisioner<'a, P: CloudProvider + ?Sized> {
    provider: &'a P,
    config: &'a DeployConfig,
    store: &'a StateStore,
    observer: &'a dyn StepObserver,
    template: Option<BootstrapTemplate>,
    /// Process-start unix time; suffixes the per-run resource names
    timestamp: u64,
}

impl<'a, P: CloudProvider + ?Sized> Provisioner<'a, P> {
    pub fn new(
        provider: &'a P,
        config: &'a DeployConfig,
        store: &'a StateStore,
        timestamp: u64,
    ) -> Self {
        Self {
            provider,
            config,
            store,
            observer: &NoopObserver,
            template: None,
            timestamp,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn StepObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Use this template instead of the configured or built-in one
    pub fn with_template(mut self, template: BootstrapTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Run every stage in order
    pub async fn run(&self) -> Result<ProvisionReport> {
        let started = Instant::now();
        let mut steps = Vec::new();
        let mut warnings = Vec::new();

        let template = self.preflight(&mut steps).await?;

        let bucket = self
            .stage(
                Stage::Bucket,
                &self.config.bucket_name(self.timestamp),
                &mut steps,
                self.create_bucket(&mut warnings),
            )
            .await?;

        let profile = self
            .stage(
                Stage::IdentityRole,
                &self.config.role_name(),
                &mut steps,
                self.create_identity(&bucket),
            )
            .await?;

        let groups = self
            .stage(
                Stage::SecurityGroups,
                &self.config.web_security_group_name(),
                &mut steps,
                self.create_security_groups(),
            )
            .await?;

        let endpoint = self
            .stage(
                Stage::Database,
                &self.config.db_identifier(self.timestamp),
                &mut steps,
                self.create_database(&groups),
            )
            .await?;

        let public_ip = self
            .stage(
                Stage::ComputeInstance,
                &self.config.instance_name(self.timestamp),
                &mut steps,
                self.launch_instance(&template, &bucket, &profile, &groups.web, &endpoint, &mut warnings),
            )
            .await?;

        self.observer
            .step_started(Stage::Finalize.id(), Stage::Finalize.description());
        let record = self.store.load().await?;
        self.observer.step_succeeded(
            Stage::Finalize.id(),
            &format!("{} keys recorded", record.len()),
        );

        let report = ProvisionReport {
            record,
            warnings,
            steps,
            app_url: public_ip.map(|ip| format!("http://{}", ip)),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            "Provisioning finished in {}ms with {} warning(s)",
            report.duration_ms,
            report.warnings.len()
        );
        Ok(report)
    }

    /// Run one stage, reporting it and naming it in any error
    async fn stage<T, Fut>(
        &self,
        stage: Stage,
        resource: &str,
        steps: &mut Vec<StepReport>,
        body: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<(T, String)>>,
    {
        tracing::info!("Stage {} ({}): {}", stage.number(), stage, resource);
        self.observer.step_started(stage.id(), stage.description());

        match body.await {
            Ok((value, message)) => {
                self.observer.step_succeeded(stage.id(), &message);
                steps.push(StepReport {
                    step: stage.id().to_string(),
                    resource: Some(resource.to_string()),
                    result: StepResult::Success(message),
                });
                Ok(value)
            }
            Err(err) => {
                self.observer.step_failed(stage.id(), &err.to_string());
                Err(CloudError::StageFailed {
                    stage,
                    resource: Some(resource.to_string()),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn preflight(&self, steps: &mut Vec<StepReport>) -> Result<BootstrapTemplate> {
        let stage = Stage::Preflight;
        self.observer.step_started(stage.id(), stage.description());

        let result = self.check_preflight().await;
        let template = match result {
            Ok(template) => template,
            Err(err) => {
                self.observer.step_failed(stage.id(), &err.to_string());
                return Err(err);
            }
        };

        self.store
            .begin(&self.config.region, self.timestamp)
            .await?;

        let message = format!(
            "{} ({}) as {}",
            self.provider.name(),
            self.provider.region(),
            self.config.app_name
        );
        self.observer.step_succeeded(stage.id(), &message);
        steps.push(StepReport {
            step: stage.id().to_string(),
            resource: None,
            result: StepResult::Success(message),
        });
        Ok(template)
    }

    async fn check_preflight(&self) -> Result<BootstrapTemplate> {
        if self.store.exists() {
            return Err(CloudError::RecordExists(self.store.record_path()));
        }

        self.config
            .validate_for_provision()
            .map_err(|e| CloudError::Preflight(e.to_string()))?;

        let auth = self
            .provider
            .check_auth()
            .await
            .map_err(|e| CloudError::Preflight(e.to_string()))?;
        if !auth.authenticated {
            return Err(CloudError::Preflight(
                auth.error
                    .unwrap_or_else(|| "provider credentials are not valid".to_string()),
            ));
        }
        if let Some(account) = &auth.account_info {
            self.observer.detail(&format!("Authenticated as {}", account));
        }

        match (&self.template, &self.config.compute.bootstrap_template) {
            (Some(template), _) => Ok(template.clone()),
            (None, Some(path)) => BootstrapTemplate::from_file(path),
            (None, None) => BootstrapTemplate::builtin(),
        }
        .map_err(|e| CloudError::Preflight(e.to_string()))
    }

    async fn save(&self, key: RecordKey, value: &str) -> Result<DeploymentRecord> {
        self.observer.detail(&format!("{}={}", key, value));
        self.store.save(key, value).await
    }

    async fn create_bucket(&self, warnings: &mut Vec<String>) -> Result<(String, String)> {
        let driver = BucketDriver::new(self.provider);
        let name = driver
            .create(&BucketSpec {
                name: self.config.bucket_name(self.timestamp),
            })
            .await?;
        self.save(RecordKey::Bucket, &name).await?;

        if let Err(e) = driver.open_public_read(&name).await {
            let warning = format!("Bucket {} stays private: {}", name, e);
            tracing::warn!("{}", warning);
            self.observer.warning(&warning);
            warnings.push(warning);
        }

        Ok((name.clone(), name))
    }

    async fn create_identity(&self, bucket: &str) -> Result<(String, String)> {
        let driver = RoleDriver::new(self.provider);

        let policy_name = self.config.policy_name();
        let role = driver
            .create(&RoleSpec {
                name: self.config.role_name(),
                policy_name: policy_name.clone(),
                bucket: bucket.to_string(),
            })
            .await?;
        self.save(RecordKey::Role, &role).await?;
        self.save(RecordKey::RolePolicy, &policy_name).await?;

        let profile = driver
            .ensure_instance_profile(&self.config.instance_profile_name(), &role)
            .await?;
        self.save(RecordKey::InstanceProfile, &profile).await?;

        let message = format!("{} via {}", role, profile);
        Ok((profile, message))
    }

    async fn create_security_groups(&self) -> Result<(SecurityGroups, String)> {
        let driver = SecurityGroupDriver::new(self.provider);
        let vpc_id = driver.default_vpc().await?;
        let compute = &self.config.compute;

        let web = driver
            .create(&SecurityGroupSpec {
                vpc_id: vpc_id.clone(),
                name: self.config.web_security_group_name(),
                description: format!("{} web access", self.config.app_name),
                rules: vec![
                    IngressRule::from_cidr(22, compute.ssh_cidr.clone()),
                    IngressRule::from_cidr(HTTP_PORT, ANYWHERE),
                    IngressRule::from_cidr(compute.app_port, ANYWHERE),
                ],
            })
            .await?;
        self.save(RecordKey::WebSecurityGroup, &web).await?;

        let db = driver
            .create(&SecurityGroupSpec {
                vpc_id: vpc_id.clone(),
                name: self.config.db_security_group_name(),
                description: format!("{} database access", self.config.app_name),
                rules: vec![IngressRule::from_group(
                    self.config.database.port,
                    web.clone(),
                )],
            })
            .await?;
        self.save(RecordKey::DbSecurityGroup, &db).await?;

        let message = format!("web {} / db {}", web, db);
        Ok((SecurityGroups { vpc_id, web, db }, message))
    }

    async fn create_database(&self, groups: &SecurityGroups) -> Result<(String, String)> {
        let network = SecurityGroupDriver::new(self.provider);
        let driver = DatabaseDriver::new(self.provider);
        let db = &self.config.database;

        let subnets = network.subnets(&groups.vpc_id).await?;
        let subnet_group = driver
            .ensure_subnet_group(&self.config.db_subnet_group_name(), &subnets)
            .await?;
        self.save(RecordKey::DbSubnetGroup, &subnet_group).await?;

        let spec = DatabaseSpec {
            identifier: self.config.db_identifier(self.timestamp),
            engine: db.engine.clone(),
            engine_version: db.engine_version.clone(),
            instance_class: db.instance_class.clone(),
            allocated_storage: db.allocated_storage,
            db_name: db.name.clone(),
            username: db.username.clone(),
            password: db.password.clone().unwrap_or_default(),
            port: db.port,
            security_group_id: groups.db.clone(),
            subnet_group,
        };

        let identifier = driver.create(&spec).await?;
        // Known to the provider from here on, even if it never becomes available
        self.save(RecordKey::DbInstance, &identifier).await?;

        self.observer.detail(&format!(
            "Waiting for database {} (up to {}s)",
            identifier,
            self.config.waits.database.budget().as_secs()
        ));
        driver
            .wait_until(
                &identifier,
                ResourceStatus::Available,
                &self.config.waits.database,
            )
            .await?;

        let endpoint = driver.endpoint(&identifier).await?;
        self.save(RecordKey::DbEndpoint, &endpoint).await?;

        let message = format!("{} at {}", identifier, endpoint);
        Ok((endpoint, message))
    }

    async fn launch_instance(
        &self,
        template: &BootstrapTemplate,
        bucket: &str,
        profile: &str,
        web_group: &str,
        endpoint: &str,
        warnings: &mut Vec<String>,
    ) -> Result<(Option<String>, String)> {
        let driver = InstanceDriver::new(self.provider);
        let compute = &self.config.compute;

        let delay = self.config.delays.iam_propagation();
        if !delay.is_zero() {
            self.observer.detail(&format!(
                "Waiting {}s for the instance profile to propagate",
                delay.as_secs()
            ));
            tokio::time::sleep(delay).await;
        }

        let image_id = driver
            .resolve_image(
                compute.image_id.as_deref(),
                &compute.image_owner,
                &compute.image_name_filter,
            )
            .await?;

        let user_data = template.render(&self.bindings(bucket, endpoint)?)?;

        let instance_id = driver
            .create(&InstanceSpec {
                name: self.config.instance_name(self.timestamp),
                image_id,
                instance_type: compute.instance_type.clone(),
                security_group_id: web_group.to_string(),
                instance_profile: profile.to_string(),
                key_name: compute.key_name.clone(),
                user_data,
            })
            .await?;
        self.save(RecordKey::Instance, &instance_id).await?;

        driver
            .wait_until(
                &instance_id,
                ResourceStatus::Available,
                &self.config.waits.instance,
            )
            .await?;

        match driver.public_ip(&instance_id).await {
            Ok(ip) => {
                self.save(RecordKey::PublicIp, &ip).await?;
                let message = format!("{} at {}", instance_id, ip);
                Ok((Some(ip), message))
            }
            Err(e) => {
                let warning = format!("Instance {} has no public address: {}", instance_id, e);
                tracing::warn!("{}", warning);
                self.observer.warning(&warning);
                warnings.push(warning);
                Ok((None, instance_id))
            }
        }
    }

    fn bindings(&self, bucket: &str, endpoint: &str) -> Result<Bindings> {
        let db = &self.config.database;
        let mut bindings = Bindings::new();
        bindings
            .bind(Slot::DbEndpoint, endpoint)?
            .bind(Slot::DbPort, db.port.to_string())?
            .bind(Slot::DbName, db.name.clone())?
            .bind(Slot::DbUsername, db.username.clone())?
            .bind(Slot::DbPassword, db.password.clone().unwrap_or_default())?
            .bind(Slot::Region, self.config.region.clone())?
            .bind(Slot::Bucket, bucket)?
            .bind(Slot::RepoUrl, self.config.repo_url.clone())?
            .bind(Slot::AppPort, self.config.compute.app_port.to_string())?;
        Ok(bindings)
    }
}

/// Security groups created by the network stage
#[derive(Debug, Clone)]
struct SecurityGroups {
    vpc_id: String,
    web: String,
    db: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_numbers() {
        assert_eq!(Stage::Preflight.number(), 0);
        assert_eq!(Stage::Bucket.number(), 1);
        assert_eq!(Stage::Database.number(), 4);
        assert_eq!(Stage::ComputeInstance.to_string(), "compute-instance");
    }
}
