//! Planned actions and run reports

use crate::provider::ResourceKind;
use crate::state::DeploymentRecord;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Represents a planned action for a cloud resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Step the action belongs to (e.g., "instance", "db-security-group")
    pub id: String,

    /// Type of action to perform
    pub action_type: ActionType,

    pub kind: ResourceKind,

    /// Resource identifier, if the record knows it
    pub resource_id: Option<String>,

    /// Description of the action
    pub description: String,
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Delete a resource
    Delete,
    /// Nothing recorded for this step
    Skip,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Delete => write!(f, "delete"),
            ActionType::Skip => write!(f, "skip"),
        }
    }
}

/// What a teardown run is about to do, shown before confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownPlan {
    /// Region the resources live in
    pub region: Option<String>,

    /// Actions in execution order
    pub actions: Vec<Action>,

    /// Whether the plan deletes anything
    pub has_changes: bool,
}

impl TeardownPlan {
    pub fn new(region: Option<String>, actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::Skip);
        Self {
            region,
            actions,
            has_changes,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            delete: self.actions_by_type(ActionType::Delete).len(),
            skip: self.actions_by_type(ActionType::Skip).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub delete: usize,
    pub skip: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to delete, {} not recorded", self.delete, self.skip)
    }
}

/// Outcome of a single step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Success(String),
    /// Nothing to do: key absent or resource already gone
    Skipped(String),
    Failed(String),
}

impl StepResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepResult::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepResult::Skipped(_))
    }

    pub fn message(&self) -> &str {
        match self {
            StepResult::Success(m) | StepResult::Skipped(m) | StepResult::Failed(m) => m,
        }
    }
}

/// A step result with the step it belongs to
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: String,
    pub resource: Option<String>,
    pub result: StepResult,
}

/// Result of a provisioning run
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    /// The record as persisted at the end of the run
    pub record: DeploymentRecord,

    /// Best-effort steps that did not work out
    pub warnings: Vec<String>,

    pub steps: Vec<StepReport>,

    /// Where the application will answer once bootstrapped
    pub app_url: Option<String>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

/// Result of a teardown run
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub steps: Vec<StepReport>,

    /// Backup of the record, set when the record was finalized
    pub backup: Option<PathBuf>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl TeardownReport {
    pub fn is_success(&self) -> bool {
        !self.steps.iter().any(|s| s.result.is_failed())
    }

    pub fn failed(&self) -> Vec<&StepReport> {
        self.steps.iter().filter(|s| s.result.is_failed()).collect()
    }

    pub fn skipped(&self) -> Vec<&StepReport> {
        self.steps.iter().filter(|s| s.result.is_skipped()).collect()
    }

    pub(crate) fn push(&mut self, step: &str, resource: Option<&str>, result: StepResult) {
        self.steps.push(StepReport {
            step: step.to_string(),
            resource: resource.map(str::to_string),
            result,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(id: &str, action_type: ActionType) -> Action {
        Action {
            id: id.to_string(),
            action_type,
            kind: ResourceKind::Bucket,
            resource_id: None,
            description: String::new(),
        }
    }

    #[test]
    fn test_plan_summary() {
        let plan = TeardownPlan::new(
            Some("us-east-1".to_string()),
            vec![
                action("instance", ActionType::Delete),
                action("database", ActionType::Skip),
                action("bucket", ActionType::Delete),
            ],
        );
        assert!(plan.has_changes);
        assert_eq!(plan.summary(), PlanSummary { delete: 2, skip: 1 });
        assert_eq!(plan.summary().to_string(), "2 to delete, 1 not recorded");
    }

    #[test]
    fn test_plan_without_deletes_has_no_changes() {
        let plan = TeardownPlan::new(None, vec![action("bucket", ActionType::Skip)]);
        assert!(!plan.has_changes);
    }

    #[test]
    fn test_report_success_ignores_skips() {
        let mut report = TeardownReport::default();
        report.push("bucket", Some("b"), StepResult::Success("deleted".into()));
        report.push("database", None, StepResult::Skipped("not recorded".into()));
        assert!(report.is_success());

        report.push("role", Some("r"), StepResult::Failed("DeleteConflict".into()));
        assert!(!report.is_success());
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.skipped().len(), 1);
    }
}
