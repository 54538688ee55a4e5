//! Teardown pipeline
//!
//! Reads the deployment record and deletes in reverse dependency order:
//! instance, database (then its subnet group), bucket, role and profile,
//! then the security groups. Every step runs even when an earlier one
//! failed; the record is only retired when nothing failed.

use crate::action::{Action, ActionType, StepResult, TeardownPlan, TeardownReport};
use crate::driver::{
    BucketDriver, DatabaseDriver, DeleteOutcome, InstanceDriver, ResourceDriver, RoleDriver,
    SecurityGroupDriver,
};
use crate::error::{CloudError, Result};
use crate::progress::{NoopObserver, StepObserver};
use crate::provider::{CloudProvider, ResourceKind, ResourceStatus};
use crate::state::{DeploymentRecord, RecordKey, StateStore};
use stackflow_config::DeployConfig;
use std::time::Instant;

/// Steps of a teardown, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownStep {
    Instance,
    Database,
    DbSubnetGroup,
    Bucket,
    DetachRole,
    InstanceProfile,
    RolePolicy,
    Role,
    DbSecurityGroup,
    WebSecurityGroup,
}

impl TeardownStep {
    pub const ALL: [TeardownStep; 10] = [
        TeardownStep::Instance,
        TeardownStep::Database,
        TeardownStep::DbSubnetGroup,
        TeardownStep::Bucket,
        TeardownStep::DetachRole,
        TeardownStep::InstanceProfile,
        TeardownStep::RolePolicy,
        TeardownStep::Role,
        TeardownStep::DbSecurityGroup,
        TeardownStep::WebSecurityGroup,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Database => "database",
            Self::DbSubnetGroup => "db-subnet-group",
            Self::Bucket => "bucket",
            Self::DetachRole => "detach-role",
            Self::InstanceProfile => "instance-profile",
            Self::RolePolicy => "role-policy",
            Self::Role => "role",
            Self::DbSecurityGroup => "db-security-group",
            Self::WebSecurityGroup => "web-security-group",
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Instance => ResourceKind::Instance,
            Self::Database => ResourceKind::Database,
            Self::DbSubnetGroup => ResourceKind::DbSubnetGroup,
            Self::Bucket => ResourceKind::Bucket,
            Self::DetachRole | Self::InstanceProfile => ResourceKind::InstanceProfile,
            Self::RolePolicy | Self::Role => ResourceKind::IdentityRole,
            Self::DbSecurityGroup | Self::WebSecurityGroup => ResourceKind::SecurityGroup,
        }
    }

    /// Record key naming the resource the step acts on
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Instance => RecordKey::Instance,
            Self::Database => RecordKey::DbInstance,
            Self::DbSubnetGroup => RecordKey::DbSubnetGroup,
            Self::Bucket => RecordKey::Bucket,
            Self::DetachRole | Self::InstanceProfile => RecordKey::InstanceProfile,
            Self::RolePolicy | Self::Role => RecordKey::Role,
            Self::DbSecurityGroup => RecordKey::DbSecurityGroup,
            Self::WebSecurityGroup => RecordKey::WebSecurityGroup,
        }
    }

    /// Every key that has to be recorded for the step to run
    fn required_keys(&self) -> &'static [RecordKey] {
        match self {
            Self::DetachRole => &[RecordKey::InstanceProfile, RecordKey::Role],
            Self::Instance => &[RecordKey::Instance],
            Self::Database => &[RecordKey::DbInstance],
            Self::DbSubnetGroup => &[RecordKey::DbSubnetGroup],
            Self::Bucket => &[RecordKey::Bucket],
            Self::InstanceProfile => &[RecordKey::InstanceProfile],
            Self::RolePolicy => &[RecordKey::Role],
            Self::Role => &[RecordKey::Role],
            Self::DbSecurityGroup => &[RecordKey::DbSecurityGroup],
            Self::WebSecurityGroup => &[RecordKey::WebSecurityGroup],
        }
    }

    /// What the recorded id names, for step messages
    fn noun(&self) -> String {
        match self {
            Self::DetachRole => "role attachment of".to_string(),
            Self::RolePolicy => "inline policies of role".to_string(),
            _ => self.kind().to_string(),
        }
    }

    fn is_security_group(&self) -> bool {
        matches!(self, Self::DbSecurityGroup | Self::WebSecurityGroup)
    }

    fn description(&self, id: &str) -> String {
        match self {
            Self::Instance => format!("Terminate instance {}", id),
            Self::Database => format!("Delete database {} (no final snapshot)", id),
            Self::DbSubnetGroup => format!("Delete DB subnet group {}", id),
            Self::Bucket => format!("Empty and delete bucket {}", id),
            Self::DetachRole => format!("Remove role from instance profile {}", id),
            Self::InstanceProfile => format!("Delete instance profile {}", id),
            Self::RolePolicy => format!("Delete inline policies of role {}", id),
            Self::Role => format!("Delete role {}", id),
            Self::DbSecurityGroup => format!("Delete database security group {}", id),
            Self::WebSecurityGroup => format!("Delete web security group {}", id),
        }
    }
}

impl std::fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Asks the operator before anything is deleted
pub trait ConfirmationPrompt {
    /// `Ok(false)` cancels the teardown
    fn confirm(&self, plan: &TeardownPlan) -> Result<bool>;
}

/// Confirms every plan without asking
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl ConfirmationPrompt for AssumeYes {
    fn confirm(&self, _plan: &TeardownPlan) -> Result<bool> {
        Ok(true)
    }
}

/// Builds the plan for a record
pub fn plan_for(record: &DeploymentRecord) -> TeardownPlan {
    let actions = TeardownStep::ALL
        .iter()
        .map(|step| {
            let resource_id = record.get(step.key()).map(str::to_string);
            let recorded = step.required_keys().iter().all(|k| record.contains(*k));
            Action {
                id: step.id().to_string(),
                action_type: if recorded {
                    ActionType::Delete
                } else {
                    ActionType::Skip
                },
                kind: step.kind(),
                description: step.description(resource_id.as_deref().unwrap_or("-")),
                resource_id,
            }
        })
        .collect();

    TeardownPlan::new(record.get(RecordKey::Region).map(str::to_string), actions)
}

/// Runs the teardown pipeline against one provider
pub struct Teardown<'a, P: CloudProvider + ?Sized> {
    provider: &'a P,
    config: &'a DeployConfig,
    store: &'a StateStore,
    observer: &'a dyn StepObserver,
    /// Names the backup of the finalized record
    timestamp: u64,
}

impl<'a, P: CloudProvider + ?Sized> Teardown<'a, P> {
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
            timestamp,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn StepObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Load the record and describe what a run would do
    pub async fn plan(&self) -> Result<(DeploymentRecord, TeardownPlan)> {
        let record = self.store.load().await?;
        let plan = plan_for(&record);
        Ok((record, plan))
    }

    /// Confirm, then delete everything the record names
    pub async fn run(&self, prompt: &dyn ConfirmationPrompt) -> Result<TeardownReport> {
        let (record, plan) = self.plan().await?;

        if let Some(region) = &plan.region {
            if region != self.provider.region() {
                tracing::warn!(
                    "Record was written for {} but the provider targets {}",
                    region,
                    self.provider.region()
                );
            }
        }

        if !prompt.confirm(&plan)? {
            tracing::info!("Teardown declined, nothing was changed");
            return Err(CloudError::ConfirmationDeclined);
        }

        let started = Instant::now();
        let mut report = TeardownReport::default();
        let mut grace_done = false;

        for step in TeardownStep::ALL {
            let resource = record.get(step.key());

            if let Some(missing) = step.required_keys().iter().find(|k| !record.contains(**k)) {
                let reason = format!("{} not recorded", missing);
                self.observer.step_skipped(step.id(), &reason);
                report.push(step.id(), resource, StepResult::Skipped(reason));
                continue;
            }
            let Some(id) = resource else { continue };

            if step.is_security_group() && !grace_done {
                grace_done = true;
                self.security_group_grace().await;
            }

            self.observer
                .step_started(step.id(), &step.description(id));

            let result = match self.execute(step, id, &record).await {
                Ok(DeleteOutcome::Deleted) => {
                    let message = format!("{} {} deleted", step.noun(), id);
                    self.observer.step_succeeded(step.id(), &message);
                    StepResult::Success(message)
                }
                Ok(DeleteOutcome::AlreadyAbsent) => {
                    let reason = format!("{} {} already absent", step.noun(), id);
                    self.observer.step_skipped(step.id(), &reason);
                    StepResult::Skipped(reason)
                }
                Err(e) if e.is_not_found() => {
                    let reason = e.to_string();
                    self.observer.step_skipped(step.id(), &reason);
                    StepResult::Skipped(reason)
                }
                Err(e) => {
                    tracing::error!("Teardown step {} failed: {}", step, e);
                    self.observer.step_failed(step.id(), &e.to_string());
                    StepResult::Failed(e.to_string())
                }
            };
            report.push(step.id(), Some(id), result);
        }

        if report.is_success() {
            report.backup = Some(self.store.finalize(self.timestamp).await?);
        } else {
            tracing::warn!(
                "{} step(s) failed; keeping {} for a retry",
                report.failed().len(),
                self.store.record_path().display()
            );
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn security_group_grace(&self) {
        let delay = self.config.delays.security_group_grace();
        if delay.is_zero() {
            return;
        }
        self.observer.detail(&format!(
            "Waiting {}s for network interfaces to be released",
            delay.as_secs()
        ));
        tokio::time::sleep(delay).await;
    }

    async fn execute(
        &self,
        step: TeardownStep,
        id: &str,
        record: &DeploymentRecord,
    ) -> Result<DeleteOutcome> {
        let deletion = &self.config.waits.deletion;

        match step {
            TeardownStep::Instance => {
                let driver = InstanceDriver::new(self.provider);
                let outcome = driver.delete(id).await?;
                if outcome == DeleteOutcome::Deleted {
                    driver
                        .wait_until(id, ResourceStatus::Deleted, deletion)
                        .await?;
                }
                Ok(outcome)
            }
            TeardownStep::Database => {
                let driver = DatabaseDriver::new(self.provider);
                let outcome = driver.delete(id).await?;
                if outcome == DeleteOutcome::Deleted {
                    self.observer.detail(&format!(
                        "Waiting for database {} to be deleted (up to {}s)",
                        id,
                        deletion.budget().as_secs()
                    ));
                    driver
                        .wait_until(id, ResourceStatus::Deleted, deletion)
                        .await?;
                }
                Ok(outcome)
            }
            TeardownStep::DbSubnetGroup => {
                DatabaseDriver::new(self.provider)
                    .delete_subnet_group(id)
                    .await
            }
            TeardownStep::Bucket => {
                let driver = BucketDriver::new(self.provider);
                let removed = match driver.empty(id).await {
                    Ok(removed) => removed,
                    Err(e) if e.is_not_found() => return Ok(DeleteOutcome::AlreadyAbsent),
                    Err(e) => return Err(e),
                };
                self.observer
                    .detail(&format!("Removed {} object(s) from {}", removed, id));
                driver.delete(id).await
            }
            TeardownStep::DetachRole => {
                let Some(role) = record.get(RecordKey::Role) else {
                    return Err(CloudError::StateError(format!(
                        "{} not recorded",
                        RecordKey::Role
                    )));
                };
                RoleDriver::new(self.provider)
                    .detach_from_profile(id, role)
                    .await
            }
            TeardownStep::InstanceProfile => {
                RoleDriver::new(self.provider).delete_profile(id).await
            }
            // Listed rather than read from the record, which may lack IAM_POLICY
            TeardownStep::RolePolicy => {
                RoleDriver::new(self.provider)
                    .delete_inline_policies(id)
                    .await
            }
            TeardownStep::Role => RoleDriver::new(self.provider).delete(id).await,
            TeardownStep::DbSecurityGroup | TeardownStep::WebSecurityGroup => {
                SecurityGroupDriver::new(self.provider).delete(id).await
            }
        }
    }
}
