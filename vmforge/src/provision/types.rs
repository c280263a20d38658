//! Type definitions for the provisioning pipeline.

use crate::hypervisor::{DiskRef, HypervisorCapability, InstanceHandle};
use crate::pipeline::PipelineMetrics;
use crate::plan::ProvisioningPlan;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use vmforge_shared::errors::{ForgeError, ForgeResult};

/// The ordered capability steps of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    CreateInstance,
    SetProcessor,
    SetMemoryPolicy,
    SetFirmware,
    AttachDisks,
    AddNetworkAdapters,
    EnableIntegrationServices,
    StartInstance,
}

impl ProvisionStep {
    /// 1-based position in the full sequence.
    pub fn index(&self) -> usize {
        match self {
            ProvisionStep::CreateInstance => 1,
            ProvisionStep::SetProcessor => 2,
            ProvisionStep::SetMemoryPolicy => 3,
            ProvisionStep::SetFirmware => 4,
            ProvisionStep::AttachDisks => 5,
            ProvisionStep::AddNetworkAdapters => 6,
            ProvisionStep::EnableIntegrationServices => 7,
            ProvisionStep::StartInstance => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStep::CreateInstance => "create_instance",
            ProvisionStep::SetProcessor => "set_processor",
            ProvisionStep::SetMemoryPolicy => "set_memory_policy",
            ProvisionStep::SetFirmware => "set_firmware",
            ProvisionStep::AttachDisks => "attach_disks",
            ProvisionStep::AddNetworkAdapters => "add_network_adapters",
            ProvisionStep::EnableIntegrationServices => "enable_integration_services",
            ProvisionStep::StartInstance => "start_instance",
        }
    }

    /// Wrap a capability failure with the plan and step it belongs to.
    pub(crate) fn failure(&self, instance: &str, err: ForgeError) -> ForgeError {
        ForgeError::Capability {
            instance: instance.to_string(),
            step: self.as_str().to_string(),
            step_index: self.index(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared provisioning pipeline context.
///
/// Inputs are fixed at construction; tasks record their outputs here.
pub struct ProvisionContext {
    pub plan: ProvisioningPlan,
    pub hypervisor: Arc<dyn HypervisorCapability>,
    pub handle: Option<InstanceHandle>,
    pub disks: Vec<DiskRef>,
    /// Step currently running (set before the capability call).
    pub current: Option<ProvisionStep>,
    pub completed: Vec<ProvisionStep>,
}

impl ProvisionContext {
    pub fn new(plan: ProvisioningPlan, hypervisor: Arc<dyn HypervisorCapability>) -> Self {
        Self {
            plan,
            hypervisor,
            handle: None,
            disks: Vec::new(),
            current: None,
            completed: Vec::new(),
        }
    }
}

/// A fully provisioned instance.
#[derive(Debug)]
pub struct ProvisionedInstance {
    pub handle: InstanceHandle,
    pub disks: Vec<DiskRef>,
    pub steps: Vec<ProvisionStep>,
    pub started: bool,
    pub metrics: PipelineMetrics,
}

/// An instance that was created but not fully configured.
///
/// Nothing is rolled back; the caller decides whether to retry, clean up or
/// continue.
#[derive(Debug)]
pub struct PartialProvisioning {
    pub handle: InstanceHandle,
    pub failed_step: ProvisionStep,
    pub error: ForgeError,
    pub completed_steps: Vec<ProvisionStep>,
    pub disks: Vec<DiskRef>,
}

/// Result of executing a plan.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed(ProvisionedInstance),
    Partial(PartialProvisioning),
}

impl ExecutionOutcome {
    pub fn handle(&self) -> &InstanceHandle {
        match self {
            ExecutionOutcome::Completed(done) => &done.handle,
            ExecutionOutcome::Partial(partial) => &partial.handle,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed(_))
    }

    /// Treat a partially provisioned instance as an error.
    pub fn into_result(self) -> ForgeResult<ProvisionedInstance> {
        match self {
            ExecutionOutcome::Completed(done) => Ok(done),
            ExecutionOutcome::Partial(partial) => Err(ForgeError::PartialProvisioning {
                instance: partial.handle.name.clone(),
                handle: partial.handle.id.clone(),
                failed_step: partial.failed_step.to_string(),
                message: partial.error.to_string(),
            }),
        }
    }
}
