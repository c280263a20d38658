//! Restart-interrupted host deployment workflow.
//!
//! ```text
//!   Stage 1  network-identity   configure network, rename      -> restart
//!   Stage 2  roles-domain       install roles, join domain     -> restart
//!   Stage 3  hardening          sharing, firewall, security, desktop
//! ```
//!
//! Each stage runs as one pipeline. A stage that ends in a restart records
//! the next stage (with the deployment snapshot) before the restart is
//! requested, so relaunching the process continues where it left off.

use super::host::{HostCapability, HostDeployment, RestartPrompt};
use super::stage::{StageController, WorkflowState};
use crate::pipeline::{
    BoxedTask, ExecutionPlan, PipelineBuilder, PipelineExecutor, PipelineTask, Stage,
};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use vmforge_shared::errors::{ForgeError, ForgeResult};

/// One host configuration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStep {
    ConfigureNetwork,
    RenameHost,
    InstallRoles,
    JoinDomain,
    EnableSharing,
    ConfigureFirewall,
    ApplySecurity,
    ConfigureDesktop,
}

impl HostStep {
    pub fn index(&self) -> usize {
        match self {
            HostStep::ConfigureNetwork => 1,
            HostStep::RenameHost => 2,
            HostStep::InstallRoles => 3,
            HostStep::JoinDomain => 4,
            HostStep::EnableSharing => 5,
            HostStep::ConfigureFirewall => 6,
            HostStep::ApplySecurity => 7,
            HostStep::ConfigureDesktop => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostStep::ConfigureNetwork => "configure_network",
            HostStep::RenameHost => "rename_host",
            HostStep::InstallRoles => "install_roles",
            HostStep::JoinDomain => "join_domain",
            HostStep::EnableSharing => "enable_sharing",
            HostStep::ConfigureFirewall => "configure_firewall",
            HostStep::ApplySecurity => "apply_security",
            HostStep::ConfigureDesktop => "configure_desktop",
        }
    }
}

impl fmt::Display for HostStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared context for one stage's pipeline.
pub struct DeployContext {
    pub deployment: HostDeployment,
    pub host: Arc<dyn HostCapability>,
    pub completed: Vec<HostStep>,
}

pub type DeployCtx = Arc<Mutex<DeployContext>>;

#[async_trait]
impl PipelineTask<DeployCtx> for HostStep {
    async fn run(self: Box<Self>, ctx: DeployCtx) -> ForgeResult<()> {
        let step = *self;
        let (host, deployment) = {
            let ctx = ctx.lock().await;
            (Arc::clone(&ctx.host), ctx.deployment.clone())
        };

        let result = match step {
            HostStep::ConfigureNetwork => match &deployment.network {
                Some(settings) => host.configure_network(settings).await.map(|_| true),
                None => Ok(false),
            },
            HostStep::RenameHost => host
                .rename_host(deployment.hostname.trim())
                .await
                .map(|_| true),
            HostStep::InstallRoles if deployment.roles.is_empty() => Ok(false),
            HostStep::InstallRoles => host.install_roles(&deployment.roles).await.map(|_| true),
            HostStep::JoinDomain => match &deployment.domain {
                Some(domain) => host.join_domain(domain).await.map(|_| true),
                None => Ok(false),
            },
            HostStep::EnableSharing => host.enable_sharing(&deployment.sharing).await.map(|_| true),
            HostStep::ConfigureFirewall => {
                host.configure_firewall(&deployment.firewall).await.map(|_| true)
            }
            HostStep::ApplySecurity => {
                host.apply_security(&deployment.security).await.map(|_| true)
            }
            HostStep::ConfigureDesktop => {
                host.configure_desktop(&deployment.desktop).await.map(|_| true)
            }
        };

        match result {
            Ok(true) => {
                tracing::info!(host = %deployment.hostname, step = %step, "Host step complete");
                ctx.lock().await.completed.push(step);
                Ok(())
            }
            Ok(false) => {
                tracing::debug!(host = %deployment.hostname, step = %step, "Nothing to do");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    host = %deployment.hostname,
                    step = %step,
                    error = %e,
                    "Host step failed"
                );
                Err(ForgeError::Capability {
                    instance: deployment.hostname.clone(),
                    step: step.as_str().to_string(),
                    step_index: step.index(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn name(&self) -> &str {
        self.as_str()
    }
}

/// A named group of steps, optionally followed by a restart.
#[derive(Debug, Clone)]
pub struct WorkflowStage {
    pub name: &'static str,
    pub steps: Vec<HostStep>,
    pub restart_after: bool,
}

/// Ordered deployment stages. Stage numbers are 1-based positions.
#[derive(Debug, Clone)]
pub struct HostWorkflow {
    stages: Vec<WorkflowStage>,
}

impl HostWorkflow {
    pub fn new(stages: Vec<WorkflowStage>) -> Self {
        Self { stages }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            WorkflowStage {
                name: "network-identity",
                steps: vec![HostStep::ConfigureNetwork, HostStep::RenameHost],
                restart_after: true,
            },
            WorkflowStage {
                name: "roles-domain",
                steps: vec![HostStep::InstallRoles, HostStep::JoinDomain],
                restart_after: true,
            },
            WorkflowStage {
                name: "hardening",
                steps: vec![
                    HostStep::EnableSharing,
                    HostStep::ConfigureFirewall,
                    HostStep::ApplySecurity,
                    HostStep::ConfigureDesktop,
                ],
                restart_after: false,
            },
        ])
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage by 1-based number.
    pub fn stage(&self, number: u32) -> Option<&WorkflowStage> {
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        self.stages.get(index)
    }

    fn execution_plan(stage: &WorkflowStage) -> ExecutionPlan<DeployCtx> {
        let tasks: Vec<BoxedTask<DeployCtx>> = stage
            .steps
            .iter()
            .map(|step| Box::new(*step) as BoxedTask<DeployCtx>)
            .collect();
        ExecutionPlan::new(vec![Stage::sequential(tasks)])
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stage recorded and restart requested; relaunch after the host is back.
    RestartPending { next_stage: u32 },
    /// Stage recorded but the operator declined to restart.
    RestartDeclined { next_stage: u32 },
    /// Every stage finished during this run.
    Completed,
    /// Nothing ran: the record says a previous run completed.
    AlreadyCompleted,
}

/// Drives a [`HostWorkflow`] from the persisted stage to the next restart.
pub struct WorkflowRunner {
    workflow: HostWorkflow,
    host: Arc<dyn HostCapability>,
    controller: StageController,
    prompt: Arc<dyn RestartPrompt>,
}

impl WorkflowRunner {
    pub fn new(
        workflow: HostWorkflow,
        host: Arc<dyn HostCapability>,
        controller: StageController,
        prompt: Arc<dyn RestartPrompt>,
    ) -> Self {
        Self {
            workflow,
            host,
            controller,
            prompt,
        }
    }

    /// Run from the persisted stage until a restart or the end.
    ///
    /// When resuming past stage 1, the snapshot saved before the restart
    /// takes precedence over `deployment`.
    ///
    /// # Errors
    ///
    /// A failing step returns `Capability`; the record still points at the
    /// stage that failed, so the next run retries it.
    pub async fn run(&self, deployment: HostDeployment) -> ForgeResult<RunOutcome> {
        let start = match self.controller.resume_state() {
            WorkflowState::Completed => {
                tracing::info!("Deployment already completed, reset to run again");
                return Ok(RunOutcome::AlreadyCompleted);
            }
            WorkflowState::NotStarted => 1,
            WorkflowState::InProgress(stage) => stage,
        };

        let total = u32::try_from(self.workflow.len())
            .map_err(|_| ForgeError::Internal("workflow has too many stages".into()))?;
        if start > total {
            return Err(ForgeError::InvalidState(format!(
                "recorded stage {} is past the last stage ({})",
                start, total
            )));
        }

        let deployment = if start > 1 {
            match self.controller.snapshot::<HostDeployment>() {
                Some(saved) => {
                    if saved != deployment {
                        tracing::info!(
                            stage = start,
                            "Using configuration saved before the restart"
                        );
                    }
                    saved
                }
                None => deployment,
            }
        } else {
            deployment
        };
        deployment.validate()?;

        for number in start..=total {
            let Some(stage) = self.workflow.stage(number) else {
                break;
            };
            tracing::info!(stage = number, name = stage.name, "Running deployment stage");

            let ctx: DeployCtx = Arc::new(Mutex::new(DeployContext {
                deployment: deployment.clone(),
                host: Arc::clone(&self.host),
                completed: Vec::new(),
            }));
            let pipeline = PipelineBuilder::from_plan(HostWorkflow::execution_plan(stage));
            let metrics = PipelineExecutor::execute(pipeline, ctx).await?;
            tracing::debug!(
                stage = number,
                duration_ms = metrics.total_duration_ms as u64,
                "Deployment stage finished"
            );

            if stage.restart_after && number < total {
                let next_stage = self.controller.advance(number, stage.name, Some(&deployment))?;
                if !self.prompt.confirm_restart(stage.name, next_stage) {
                    tracing::warn!(
                        next_stage,
                        "Restart declined; deployment paused until relaunched"
                    );
                    return Ok(RunOutcome::RestartDeclined { next_stage });
                }
                self.host.restart().await?;
                return Ok(RunOutcome::RestartPending { next_stage });
            }
        }

        self.controller.complete(total)?;
        Ok(RunOutcome::Completed)
    }
}
