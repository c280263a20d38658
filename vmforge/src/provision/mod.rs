//! Provisioning executor.
//!
//! ## Architecture
//!
//! Execution is table-driven; the plan decides which tasks are scheduled:
//!
//! ```text
//!   1. CreateInstance           (hard fail: nothing else is attempted)
//!   2. SetProcessor
//!   3. SetMemoryPolicy
//!   4. SetFirmware              (generation 2 only)
//!   5. AttachDisks              (OS, then Data and Log for database servers)
//!   6. AddNetworkAdapters       (count - 1)
//!   7. EnableIntegrationServices (enhanced session only)
//!   8. StartInstance            (only when requested)
//! ```
//!
//! A failure after step 1 leaves the instance in place and is reported as
//! [`ExecutionOutcome::Partial`]. Nothing is retried or rolled back: steps
//! 2-7 are not safe to repeat against a half-configured instance.

mod tasks;
mod types;

pub use types::{
    ExecutionOutcome, PartialProvisioning, ProvisionContext, ProvisionStep, ProvisionedInstance,
};

use crate::hypervisor::HypervisorCapability;
use crate::pipeline::{BoxedTask, ExecutionPlan, PipelineBuilder, PipelineExecutor, Stage};
use crate::plan::ProvisioningPlan;
use crate::template::Generation;
use std::sync::Arc;
use tasks::{
    AdaptersTask, CreateInstanceTask, DisksTask, FirmwareTask, IntegrationTask, MemoryPolicyTask,
    ProcessorTask, ProvisionCtx, StartTask,
};
use tokio::sync::Mutex;
use vmforge_shared::errors::{ForgeError, ForgeResult};

// ============================================================================
// EXECUTION PLAN
// ============================================================================

/// Get the execution table for a provisioning plan.
fn get_execution_plan(plan: &ProvisioningPlan, start: bool) -> ExecutionPlan<ProvisionCtx> {
    let mut configure: Vec<BoxedTask<ProvisionCtx>> =
        vec![Box::new(ProcessorTask), Box::new(MemoryPolicyTask)];
    if plan.firmware.generation == Generation::Gen2 {
        configure.push(Box::new(FirmwareTask));
    }

    let mut attach: Vec<BoxedTask<ProvisionCtx>> =
        vec![Box::new(DisksTask), Box::new(AdaptersTask)];
    if plan.enhanced_session {
        attach.push(Box::new(IntegrationTask));
    }

    let mut power: Vec<BoxedTask<ProvisionCtx>> = Vec::new();
    if start {
        power.push(Box::new(StartTask));
    }

    ExecutionPlan::new(vec![
        // Phase 1: the instance itself
        Stage::sequential(vec![Box::new(CreateInstanceTask)]),
        // Phase 2: compute and firmware settings
        Stage::sequential(configure),
        // Phase 3: storage, network and integration services
        Stage::sequential(attach),
        // Phase 4: power on
        Stage::sequential(power),
    ])
}

/// Realizes provisioning plans against a hypervisor.
#[derive(Clone)]
pub struct ProvisionExecutor {
    hypervisor: Arc<dyn HypervisorCapability>,
}

impl ProvisionExecutor {
    pub fn new(hypervisor: Arc<dyn HypervisorCapability>) -> Self {
        Self { hypervisor }
    }

    /// Execute a plan, optionally starting the instance afterwards.
    ///
    /// # Errors
    ///
    /// - `NameCollision` if the instance name exists by now (plans are single-use)
    /// - `Capability` if instance creation fails; nothing else was attempted
    ///
    /// Failures after creation are returned as `Ok(ExecutionOutcome::Partial)`.
    pub async fn execute(
        &self,
        plan: &ProvisioningPlan,
        start: bool,
    ) -> ForgeResult<ExecutionOutcome> {
        let existing = self.hypervisor.list_instance_names().await?;
        if existing
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&plan.instance_name))
        {
            return Err(ForgeError::NameCollision(plan.instance_name.clone()));
        }

        let table = get_execution_plan(plan, start);
        tracing::info!(
            instance = %plan.instance_name,
            template = %plan.template.name,
            steps = ?table.task_names(),
            "Provisioning instance"
        );

        let ctx: ProvisionCtx = Arc::new(Mutex::new(ProvisionContext::new(
            plan.clone(),
            Arc::clone(&self.hypervisor),
        )));
        let result =
            PipelineExecutor::execute(PipelineBuilder::from_plan(table), Arc::clone(&ctx)).await;

        let mut ctx = ctx.lock().await;
        let disks = std::mem::take(&mut ctx.disks);
        let completed = std::mem::take(&mut ctx.completed);

        match result {
            Ok(metrics) => {
                let handle = ctx
                    .handle
                    .take()
                    .ok_or_else(|| ForgeError::Internal("handle was not set".into()))?;
                tracing::info!(
                    instance = %handle,
                    duration_ms = metrics.total_duration_ms as u64,
                    "Provisioning complete"
                );
                Ok(ExecutionOutcome::Completed(ProvisionedInstance {
                    handle,
                    disks,
                    started: completed.contains(&ProvisionStep::StartInstance),
                    steps: completed,
                    metrics,
                }))
            }
            Err(error) => {
                // Creation itself failed: nothing exists, so this is a plain error.
                let Some(handle) = ctx.handle.take() else {
                    return Err(error);
                };
                let failed_step = ctx.current.unwrap_or(ProvisionStep::CreateInstance);
                tracing::warn!(
                    instance = %handle,
                    failed_step = failed_step.index(),
                    task = failed_step.as_str(),
                    completed = ?completed,
                    error = %error,
                    "PartialProvisioning: instance left partially configured"
                );
                Ok(ExecutionOutcome::Partial(PartialProvisioning {
                    handle,
                    failed_step,
                    error,
                    completed_steps: completed,
                    disks,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypervisor::{ENHANCED_SESSION, NetworkRef};
    use crate::hypervisor::fake::{Call, FakeHypervisor};
    use crate::plan::{DiskRole, MemoryPolicy, PlanInput, TemplateRef, plan};
    use crate::template::{
        CustomFields, FieldOverrides, WorkloadKind, apply_overrides, build_custom, preset,
    };

    fn make_plan(kind: WorkloadKind, name: &str) -> ProvisioningPlan {
        let spec = preset(kind).unwrap();
        plan(PlanInput {
            spec: &spec,
            template: TemplateRef::unsaved(kind.as_str()),
            instance_name: name,
            network: &NetworkRef::new("External"),
            existing_names: &Default::default(),
            available_networks: &[NetworkRef::new("External")],
        })
        .unwrap()
    }

    fn executor(hv: &Arc<FakeHypervisor>) -> ProvisionExecutor {
        ProvisionExecutor::new(Arc::clone(hv) as Arc<dyn HypervisorCapability>)
    }

    #[tokio::test]
    async fn test_application_server_full_sequence() {
        let hv = Arc::new(FakeHypervisor::new(&["External"], &["DC01"]));
        let spec = apply_overrides(
            &preset(WorkloadKind::ApplicationServer).unwrap(),
            &FieldOverrides {
                memory_mb: Some(16384),
                ..Default::default()
            },
        )
        .unwrap();
        let plan = plan(PlanInput {
            spec: &spec,
            template: TemplateRef::unsaved("app"),
            instance_name: "APP01",
            network: &NetworkRef::new("External"),
            existing_names: &hv.list_instance_names().await.unwrap(),
            available_networks: &hv.list_networks().await.unwrap(),
        })
        .unwrap();

        let outcome = executor(&hv).execute(&plan, true).await.unwrap();
        let done = outcome.into_result().unwrap();

        assert!(done.started);
        assert_eq!(done.handle.name, "APP01");
        assert_eq!(
            hv.calls(),
            vec![
                Call::CreateInstance {
                    name: "APP01".into(),
                    generation: Generation::Gen2,
                    memory_bytes: 16384 * 1024 * 1024,
                    network: "External".into(),
                },
                Call::SetProcessor(4),
                Call::SetMemory(MemoryPolicy::Dynamic {
                    startup_mb: 16384,
                    minimum_mb: 8192,
                    maximum_mb: 32768,
                }),
                Call::SetFirmware(true),
                Call::CreateDisk(DiskRole::Os, 120 * 1024 * 1024 * 1024),
                Call::AttachDisk(DiskRole::Os),
                Call::AddAdapter("External".into()),
                Call::Start,
            ]
        );
        assert_eq!(
            done.metrics.task_names(),
            vec![
                "create_instance",
                "set_processor",
                "set_memory_policy",
                "set_firmware",
                "attach_disks",
                "add_network_adapters",
                "start_instance",
            ]
        );
    }

    #[tokio::test]
    async fn test_database_server_disks_in_order() {
        let hv = Arc::new(FakeHypervisor::new(&["External"], &[]));
        let plan = make_plan(WorkloadKind::DatabaseServer, "SQL01");

        let done = executor(&hv)
            .execute(&plan, false)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        let roles: Vec<DiskRole> = done.disks.iter().map(|d| d.role).collect();
        assert_eq!(roles, vec![DiskRole::Os, DiskRole::Data, DiskRole::Log]);
        assert!(!done.started);
        assert!(!hv.calls().contains(&Call::Start));
    }

    #[tokio::test]
    async fn test_gen1_skips_firmware_and_vdi_enables_integration() {
        let hv = Arc::new(FakeHypervisor::new(&["External"], &[]));
        let spec = build_custom(&CustomFields {
            generation: Some(Generation::Gen1),
            ..Default::default()
        })
        .unwrap();
        let gen1 = plan(PlanInput {
            spec: &spec,
            template: TemplateRef::unsaved("legacy"),
            instance_name: "OLD01",
            network: &NetworkRef::new("External"),
            existing_names: &Default::default(),
            available_networks: &[NetworkRef::new("External")],
        })
        .unwrap();
        executor(&hv).execute(&gen1, false).await.unwrap();
        assert!(!hv.calls().iter().any(|c| matches!(c, Call::SetFirmware(_))));

        let vdi = make_plan(WorkloadKind::Vdi, "VDI01");
        executor(&hv).execute(&vdi, false).await.unwrap();
        assert!(
            hv.calls()
                .contains(&Call::EnableIntegration(ENHANCED_SESSION.into()))
        );
    }

    #[tokio::test]
    async fn test_memory_failure_is_partial_provisioning() {
        let hv = Arc::new(FakeHypervisor::new(&["External"], &[]));
        hv.fail_on("set_memory_policy", "memory configuration rejected");
        let plan = make_plan(WorkloadKind::ApplicationServer, "APP01");

        let outcome = executor(&hv).execute(&plan, true).await.unwrap();

        let ExecutionOutcome::Partial(partial) = outcome else {
            panic!("expected partial provisioning");
        };
        assert_eq!(partial.handle.name, "APP01");
        assert_eq!(partial.failed_step, ProvisionStep::SetMemoryPolicy);
        assert_eq!(
            partial.completed_steps,
            vec![ProvisionStep::CreateInstance, ProvisionStep::SetProcessor]
        );
        match &partial.error {
            ForgeError::Capability {
                instance,
                step_index,
                message,
                ..
            } => {
                assert_eq!(instance, "APP01");
                assert_eq!(*step_index, 3);
                assert!(message.contains("memory configuration rejected"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Steps 4-8 were never attempted
        let calls = hv.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], Call::CreateInstance { .. }));
        assert_eq!(calls[1], Call::SetProcessor(4));
    }

    #[tokio::test]
    async fn test_partial_into_result_names_handle() {
        let hv = Arc::new(FakeHypervisor::new(&["External"], &[]));
        hv.fail_on("attach_disk", "disk locked");
        let plan = make_plan(WorkloadKind::WebServer, "WEB01");

        let outcome = executor(&hv).execute(&plan, false).await.unwrap();
        assert!(!outcome.is_complete());
        assert_eq!(outcome.handle().id, "vm-web01");

        let ExecutionOutcome::Partial(partial) = &outcome else {
            panic!("expected partial provisioning");
        };
        // Disk was created even though attaching it failed
        assert_eq!(partial.disks.len(), 1);

        let err = outcome.into_result().unwrap_err();
        match err {
            ForgeError::PartialProvisioning {
                instance,
                handle,
                failed_step,
                ..
            } => {
                assert_eq!(instance, "WEB01");
                assert_eq!(handle, "vm-web01");
                assert_eq!(failed_step, "attach_disks");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_failure_is_hard_error() {
        let hv = Arc::new(FakeHypervisor::new(&["External"], &[]));
        hv.fail_on("create_instance", "out of memory");
        let plan = make_plan(WorkloadKind::WebServer, "WEB01");

        let err = executor(&hv).execute(&plan, true).await.unwrap_err();

        assert!(matches!(
            err,
            ForgeError::Capability { step_index: 1, .. }
        ));
        assert!(hv.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plan_is_single_use() {
        let hv = Arc::new(FakeHypervisor::new(&["External"], &[]));
        let plan = make_plan(WorkloadKind::WebServer, "WEB01");
        let executor = executor(&hv);

        executor.execute(&plan, false).await.unwrap();
        let err = executor.execute(&plan, false).await.unwrap_err();

        assert!(matches!(err, ForgeError::NameCollision(ref n) if n == "WEB01"));
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_before_creation() {
        let hv = Arc::new(FakeHypervisor::new(&["External"], &[]));
        hv.fail_on("list_instance_names", "access denied");
        let plan = make_plan(WorkloadKind::WebServer, "WEB01");

        assert!(executor(&hv).execute(&plan, false).await.is_err());
        assert!(hv.calls().is_empty());
    }

    #[test]
    fn test_execution_table() {
        let app = make_plan(WorkloadKind::ApplicationServer, "APP01");
        assert_eq!(
            get_execution_plan(&app, false).task_names(),
            vec![
                "create_instance",
                "set_processor",
                "set_memory_policy",
                "set_firmware",
                "attach_disks",
                "add_network_adapters",
            ]
        );

        let vdi = make_plan(WorkloadKind::Vdi, "VDI01");
        let names = get_execution_plan(&vdi, true).task_names();
        assert_eq!(names.last().map(String::as_str), Some("start_instance"));
        assert!(names.contains(&"enable_integration_services".to_string()));
    }
}
