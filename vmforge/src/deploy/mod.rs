//! Resumable host deployment.
//!
//! [`StageController`] persists the workflow position across host restarts;
//! [`WorkflowRunner`] runs [`HostWorkflow`] stages against a
//! [`HostCapability`] and checkpoints before each restart.

mod host;
mod stage;
mod workflow;

pub use host::{
    AutoRestart, DesktopSettings, DomainJoin, FirewallSettings, HostCapability, HostDeployment,
    ManualRestart, NetworkSettings, RestartPrompt, SecuritySettings, SharingSettings,
};
pub use stage::{STAGE_RECORD_VERSION, StageController, StageRecord, WorkflowState};
pub use workflow::{
    DeployContext, DeployCtx, HostStep, HostWorkflow, RunOutcome, WorkflowRunner, WorkflowStage,
};
