//! vmforge: template-driven VM provisioning with resumable host deployment.
//!
//! ```text
//! template (catalog + store) ──> plan ──> provision (pipeline) ──> hypervisor
//! deploy (stage record + host workflow) ──> host capability
//! ```
//!
//! [`ForgeRuntime`] wires these together behind one handle.

pub mod db;
pub mod deploy;
pub mod hypervisor;
pub mod logging;
pub mod pipeline;
pub mod plan;
pub mod provision;
pub mod runtime;
pub mod template;

pub use logging::init_logging;
pub use runtime::{FilesystemLayout, ForgeOptions, ForgeRuntime, LoggingOptions, ProvisionRequest};
pub use vmforge_shared::{ForgeError, ForgeResult};

pub use deploy::{HostCapability, HostDeployment, RunOutcome, StageController, WorkflowState};
pub use hypervisor::{HypervisorCapability, InstanceHandle, NetworkRef, PowerShellHypervisor};
pub use plan::ProvisioningPlan;
pub use provision::{ExecutionOutcome, PartialProvisioning, ProvisionExecutor};
pub use template::{
    FieldOverrides, Generation, TemplateId, TemplateRecord, TemplateSpec, WorkloadKind,
};
