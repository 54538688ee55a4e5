//! stackflow cloud orchestration
//!
//! Provisions and tears down one fixed topology for a small web application:
//! a storage bucket, an identity role with an instance profile, two security
//! groups, a managed database and a compute instance.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  stackflow CLI                   │
//! │       (provision / teardown / status)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               stackflow-cloud                    │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │ Provisioner  │  │   Teardown   │             │
//! │  └──────┬───────┘  └──────┬───────┘             │
//! │  ┌──────▼─────────────────▼───────┐ ┌─────────┐ │
//! │  │        Resource drivers         │ │  State  │ │
//! │  └──────────────┬──────────────────┘ └─────────┘ │
//! │  ┌──────────────▼──────────────────────────┐    │
//! │  │  Provider traits (trait CloudProvider)   │    │
//! │  └──────────────────────────────────────────┘    │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │      aws      │ │    memory     │
//! │   provider    │ │   provider    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod action;
pub mod bootstrap;
pub mod driver;
pub mod error;
pub mod memory;
pub mod progress;
pub mod provider;
pub mod provision;
pub mod state;
pub mod status;
pub mod teardown;
pub mod wait;

// Re-exports
pub use action::{
    Action, ActionType, PlanSummary, ProvisionReport, StepReport, StepResult, TeardownPlan,
    TeardownReport,
};
pub use bootstrap::{Bindings, BootstrapTemplate, Slot};
pub use driver::{DeleteOutcome, ResourceDriver};
pub use error::{CloudError, Result};
pub use memory::{MemoryBehavior, MemoryProvider};
pub use progress::{NoopObserver, StepObserver};
pub use provider::{
    AuthStatus, BucketApi, CloudProvider, ComputeApi, DatabaseApi, IdentityApi, NetworkApi,
    ResourceHandle, ResourceKind, ResourceStatus,
};
pub use provision::{Provisioner, Stage};
pub use state::{DeploymentRecord, RecordKey, StateLock, StateStore};
pub use teardown::{AssumeYes, ConfirmationPrompt, Teardown, TeardownStep};
