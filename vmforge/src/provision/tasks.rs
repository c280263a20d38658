//! Provisioning tasks, one per capability step.
//!
//! Every task follows the same shape: snapshot its inputs from the shared
//! context, make its capability call(s) without holding the lock, then
//! record the output and mark the step completed.

use super::types::{ProvisionContext, ProvisionStep};
use crate::hypervisor::{ENHANCED_SESSION, HypervisorCapability, InstanceHandle};
use crate::pipeline::PipelineTask;
use crate::plan::{ProvisioningPlan, mb_to_bytes};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use vmforge_shared::errors::{ForgeError, ForgeResult};

pub type ProvisionCtx = Arc<Mutex<ProvisionContext>>;

/// Inputs every task needs, copied out of the context.
struct TaskInputs {
    hypervisor: Arc<dyn HypervisorCapability>,
    plan: ProvisioningPlan,
    handle: Option<InstanceHandle>,
}

impl TaskInputs {
    fn handle(&self) -> ForgeResult<&InstanceHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| ForgeError::Internal("create_instance task must run first".into()))
    }
}

async fn task_start(ctx: &ProvisionCtx, step: ProvisionStep) -> TaskInputs {
    let mut ctx = ctx.lock().await;
    ctx.current = Some(step);
    tracing::debug!(
        instance = %ctx.plan.instance_name,
        step = step.index(),
        task = step.as_str(),
        "Starting provisioning step"
    );
    TaskInputs {
        hypervisor: Arc::clone(&ctx.hypervisor),
        plan: ctx.plan.clone(),
        handle: ctx.handle.clone(),
    }
}

async fn task_done(ctx: &ProvisionCtx, step: ProvisionStep) {
    let mut ctx = ctx.lock().await;
    ctx.current = None;
    ctx.completed.push(step);
}

fn log_task_error(instance: &str, step: ProvisionStep, err: &ForgeError) {
    tracing::error!(
        instance = %instance,
        step = step.index(),
        task = step.as_str(),
        error = %err,
        "Provisioning step failed"
    );
}

/// Wrap and log a capability failure for `step`.
fn step_err(instance: &str, step: ProvisionStep) -> impl FnOnce(ForgeError) -> ForgeError + '_ {
    move |e| {
        let err = step.failure(instance, e);
        log_task_error(instance, step, &err);
        err
    }
}

pub struct CreateInstanceTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for CreateInstanceTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> ForgeResult<()> {
        let step = ProvisionStep::CreateInstance;
        let input = task_start(&ctx, step).await;
        let plan = &input.plan;

        let handle = input
            .hypervisor
            .create_instance(
                &plan.instance_name,
                plan.firmware.generation,
                mb_to_bytes(plan.memory.startup_mb()),
                &plan.adapters.network,
            )
            .await
            .map_err(step_err(&plan.instance_name, step))?;

        tracing::info!(instance = %handle, "Created instance");

        ctx.lock().await.handle = Some(handle);
        task_done(&ctx, step).await;
        Ok(())
    }

    fn name(&self) -> &str {
        ProvisionStep::CreateInstance.as_str()
    }
}

pub struct ProcessorTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for ProcessorTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> ForgeResult<()> {
        let step = ProvisionStep::SetProcessor;
        let input = task_start(&ctx, step).await;
        let handle = input.handle()?;

        input
            .hypervisor
            .set_processor_count(handle, input.plan.cpu_count)
            .await
            .map_err(step_err(&input.plan.instance_name, step))?;

        task_done(&ctx, step).await;
        Ok(())
    }

    fn name(&self) -> &str {
        ProvisionStep::SetProcessor.as_str()
    }
}

pub struct MemoryPolicyTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for MemoryPolicyTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> ForgeResult<()> {
        let step = ProvisionStep::SetMemoryPolicy;
        let input = task_start(&ctx, step).await;
        let handle = input.handle()?;

        input
            .hypervisor
            .set_memory_policy(handle, &input.plan.memory)
            .await
            .map_err(step_err(&input.plan.instance_name, step))?;

        task_done(&ctx, step).await;
        Ok(())
    }

    fn name(&self) -> &str {
        ProvisionStep::SetMemoryPolicy.as_str()
    }
}

/// Only scheduled for generation 2 plans.
pub struct FirmwareTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for FirmwareTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> ForgeResult<()> {
        let step = ProvisionStep::SetFirmware;
        let input = task_start(&ctx, step).await;
        let handle = input.handle()?;

        input
            .hypervisor
            .set_firmware(handle, input.plan.firmware.secure_boot)
            .await
            .map_err(step_err(&input.plan.instance_name, step))?;

        task_done(&ctx, step).await;
        Ok(())
    }

    fn name(&self) -> &str {
        ProvisionStep::SetFirmware.as_str()
    }
}

/// Creates and attaches each planned disk, in plan order.
pub struct DisksTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for DisksTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> ForgeResult<()> {
        let step = ProvisionStep::AttachDisks;
        let input = task_start(&ctx, step).await;
        let handle = input.handle()?;
        let instance = &input.plan.instance_name;

        for disk in &input.plan.disks {
            let disk_ref = input
                .hypervisor
                .create_disk(instance, disk.role, disk.size_bytes())
                .await
                .map_err(step_err(instance, step))?;
            // Record before attaching so a failed attach still reports the file.
            ctx.lock().await.disks.push(disk_ref.clone());

            input
                .hypervisor
                .attach_disk(handle, &disk_ref)
                .await
                .map_err(step_err(instance, step))?;

            tracing::debug!(
                instance = %instance,
                role = disk.role.as_str(),
                size_gb = disk.size_gb,
                path = %disk_ref.path.display(),
                "Attached disk"
            );
        }

        task_done(&ctx, step).await;
        Ok(())
    }

    fn name(&self) -> &str {
        ProvisionStep::AttachDisks.as_str()
    }
}

/// Adds `count - 1` adapters; the first one is bound at creation.
pub struct AdaptersTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for AdaptersTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> ForgeResult<()> {
        let step = ProvisionStep::AddNetworkAdapters;
        let input = task_start(&ctx, step).await;
        let handle = input.handle()?;
        let adapters = &input.plan.adapters;

        for _ in 1..adapters.count {
            input
                .hypervisor
                .add_network_adapter(handle, &adapters.network)
                .await
                .map_err(step_err(&input.plan.instance_name, step))?;
        }

        task_done(&ctx, step).await;
        Ok(())
    }

    fn name(&self) -> &str {
        ProvisionStep::AddNetworkAdapters.as_str()
    }
}

/// Only scheduled when the plan requests enhanced session mode.
pub struct IntegrationTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for IntegrationTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> ForgeResult<()> {
        let step = ProvisionStep::EnableIntegrationServices;
        let input = task_start(&ctx, step).await;
        let handle = input.handle()?;

        input
            .hypervisor
            .enable_integration_service(handle, ENHANCED_SESSION)
            .await
            .map_err(step_err(&input.plan.instance_name, step))?;

        task_done(&ctx, step).await;
        Ok(())
    }

    fn name(&self) -> &str {
        ProvisionStep::EnableIntegrationServices.as_str()
    }
}

/// Only scheduled when the caller asks for the instance to be started.
pub struct StartTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for StartTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> ForgeResult<()> {
        let step = ProvisionStep::StartInstance;
        let input = task_start(&ctx, step).await;
        let handle = input.handle()?;

        input
            .hypervisor
            .start_instance(handle)
            .await
            .map_err(step_err(&input.plan.instance_name, step))?;

        tracing::info!(instance = %handle, "Started instance");

        task_done(&ctx, step).await;
        Ok(())
    }

    fn name(&self) -> &str {
        ProvisionStep::StartInstance.as_str()
    }
}
