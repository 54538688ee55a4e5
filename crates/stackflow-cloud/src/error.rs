//! Cloud provisioning error types

use crate::provider::ResourceStatus;
use crate::provision::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Provisioning, teardown and provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    /// Credentials or configuration are unusable; nothing has been touched yet.
    #[error("Preflight check failed: {0}")]
    Preflight(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// A named resource is already present. Drivers turn this into reuse.
    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("API error during {operation}: {message}")]
    ApiError { operation: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Template error: {0}")]
    Template(String),

    /// A bounded wait ran out of attempts.
    #[error("Timed out waiting for {resource} to become {target} after {attempts} attempts")]
    Timeout {
        resource: String,
        target: ResourceStatus,
        attempts: u32,
    },

    /// The provider reports a terminal error state while waiting.
    #[error("{resource} entered a failed state ({detail})")]
    ResourceFailed { resource: String, detail: String },

    #[error("Stage '{stage}' failed{}: {source}", .resource.as_ref().map(|r| format!(" for {}", r)).unwrap_or_default())]
    StageFailed {
        stage: Stage,
        resource: Option<String>,
        #[source]
        source: Box<CloudError>,
    },

    #[error("No deployment record at {0}; nothing is known to clean up")]
    StateStoreMissing(PathBuf),

    #[error("A deployment record already exists at {0}; run teardown before provisioning again")]
    RecordExists(PathBuf),

    #[error("Record key {key} is already set to '{existing}' (refusing to overwrite with '{new}')")]
    RecordConflict {
        key: String,
        existing: String,
        new: String,
    },

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Teardown cancelled by operator")]
    ConfirmationDeclined,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn api(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::ApiError {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ResourceNotFound(_) => true,
            Self::StageFailed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::ResourceAlreadyExists(_))
    }

    /// The stage a provisioning error was raised in, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<stackflow_config::ConfigError> for CloudError {
    fn from(err: stackflow_config::ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failed_message_names_stage_and_resource() {
        let err = CloudError::StageFailed {
            stage: Stage::Database,
            resource: Some("portfolio-app-db-1700000000".to_string()),
            source: Box::new(CloudError::Timeout {
                resource: "database portfolio-app-db-1700000000".to_string(),
                target: ResourceStatus::Available,
                attempts: 3,
            }),
        };

        let message = err.to_string();
        assert!(message.contains("database"));
        assert!(message.contains("portfolio-app-db-1700000000"));
        assert!(message.contains("available"));
        assert_eq!(err.stage(), Some(Stage::Database));
    }

    #[test]
    fn test_not_found_through_stage_wrapper() {
        let err = CloudError::StageFailed {
            stage: Stage::Bucket,
            resource: None,
            source: Box::new(CloudError::ResourceNotFound("bucket".to_string())),
        };
        assert!(err.is_not_found());
        assert!(!CloudError::ConfirmationDeclined.is_not_found());
    }
}
