//! High-level runtime facade.

use super::layout::FilesystemLayout;
use super::options::ForgeOptions;
use crate::db::{Database, SqliteTemplateStore};
use crate::deploy::{
    HostCapability, HostDeployment, HostWorkflow, RestartPrompt, RunOutcome, StageController,
    WorkflowRunner,
};
use crate::hypervisor::{HypervisorCapability, NetworkRef, PowerShellHypervisor};
use crate::init_logging;
use crate::plan::{PlanInput, ProvisioningPlan, TemplateRef, plan};
use crate::provision::{ExecutionOutcome, ProvisionExecutor};
use crate::template::{
    FieldOverrides, TemplateId, TemplateRecord, TemplateSpec, TemplateStore, apply_overrides,
};
use std::sync::Arc;
use vmforge_shared::errors::{ForgeError, ForgeResult};

/// Everything needed to turn a saved template into a running instance.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub template_id: TemplateId,
    pub instance_name: String,
    pub network: NetworkRef,
    pub overrides: FieldOverrides,
    /// Start the instance once configured.
    pub start: bool,
}

/// Entry point wiring templates, planning, provisioning and deployment state.
///
/// **Cloning**: cheap via `Arc`; all clones share the same database and
/// hypervisor.
#[derive(Clone)]
pub struct ForgeRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    options: ForgeOptions,
    layout: FilesystemLayout,
    store: Arc<dyn TemplateStore>,
    hypervisor: Arc<dyn HypervisorCapability>,
    executor: ProvisionExecutor,
}

impl ForgeRuntime {
    /// Create a runtime backed by Hyper-V through PowerShell.
    pub fn new(options: ForgeOptions) -> ForgeResult<Self> {
        let storage_root = options
            .storage_root
            .clone()
            .unwrap_or_else(|| FilesystemLayout::new(options.home_dir.clone()).disks_dir());
        Self::with_hypervisor(options, Arc::new(PowerShellHypervisor::new(storage_root)))
    }

    /// Create a runtime with a caller-supplied hypervisor.
    ///
    /// **Prepare Before Execute**: filesystem, logging and database are set
    /// up before returning.
    ///
    /// # Errors
    ///
    /// - `Config` if the options are invalid
    /// - `Storage` if the home directory or database cannot be initialized
    pub fn with_hypervisor(
        options: ForgeOptions,
        hypervisor: Arc<dyn HypervisorCapability>,
    ) -> ForgeResult<Self> {
        options.validate()?;

        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare().map_err(|e| {
            ForgeError::Storage(format!(
                "Failed to initialize filesystem at {}: {}",
                layout.home_dir().display(),
                e
            ))
        })?;

        init_logging(&options.logging, &layout.logs_dir())?;

        let db = Database::open(&layout.db_path()).map_err(|e| {
            ForgeError::Storage(format!(
                "Failed to initialize database at {}: {}",
                layout.db_path().display(),
                e
            ))
        })?;
        let store: Arc<dyn TemplateStore> =
            Arc::new(SqliteTemplateStore::new(db, options.engine_version.clone()));

        tracing::debug!(home = %layout.home_dir().display(), "Initialized runtime");

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                executor: ProvisionExecutor::new(Arc::clone(&hypervisor)),
                options,
                layout,
                store,
                hypervisor,
            }),
        })
    }

    pub fn options(&self) -> &ForgeOptions {
        &self.inner.options
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    // ========================================================================
    // TEMPLATES
    // ========================================================================

    pub fn save_template(&self, name: &str, spec: &TemplateSpec) -> ForgeResult<TemplateRecord> {
        self.inner.store.save(name, spec)
    }

    pub fn load_template(&self, id: &TemplateId) -> ForgeResult<TemplateRecord> {
        self.inner.store.load(id)
    }

    pub fn list_templates(&self) -> ForgeResult<Vec<TemplateRecord>> {
        self.inner.store.list()
    }

    pub fn delete_template(&self, id: &TemplateId) -> ForgeResult<()> {
        self.inner.store.delete(id)
    }

    // ========================================================================
    // PROVISIONING
    // ========================================================================

    /// Load the template, apply overrides and plan against the current host.
    ///
    /// Nothing is created. Planning errors name the offending field, name or
    /// network.
    pub async fn plan_instance(&self, request: &ProvisionRequest) -> ForgeResult<ProvisioningPlan> {
        let record = self.load_template(&request.template_id)?;
        let spec = if request.overrides.is_empty() {
            record.spec
        } else {
            apply_overrides(&record.spec, &request.overrides)?
        };

        let existing_names = self.inner.hypervisor.list_instance_names().await?;
        let networks = self.inner.hypervisor.list_networks().await?;

        plan(PlanInput {
            spec: &spec,
            template: TemplateRef {
                id: Some(record.id),
                name: record.name,
            },
            instance_name: &request.instance_name,
            network: &request.network,
            existing_names: &existing_names,
            available_networks: &networks,
        })
    }

    /// Plan and execute a request.
    ///
    /// A failure after the instance was created is returned as
    /// `Ok(ExecutionOutcome::Partial)`; use
    /// [`ExecutionOutcome::into_result`] to treat it as an error.
    pub async fn provision(&self, request: &ProvisionRequest) -> ForgeResult<ExecutionOutcome> {
        let plan = self.plan_instance(request).await?;
        self.inner.executor.execute(&plan, request.start).await
    }

    // ========================================================================
    // DEPLOYMENT
    // ========================================================================

    pub fn stage_controller(&self) -> StageController {
        StageController::new(self.inner.layout.stage_record_path())
    }

    /// Run the standard host workflow from the persisted stage.
    pub async fn deploy_host(
        &self,
        host: Arc<dyn HostCapability>,
        prompt: Arc<dyn RestartPrompt>,
        deployment: HostDeployment,
    ) -> ForgeResult<RunOutcome> {
        WorkflowRunner::new(
            HostWorkflow::standard(),
            host,
            self.stage_controller(),
            prompt,
        )
        .run(deployment)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::WorkflowState;
    use crate::hypervisor::fake::{Call, FakeHypervisor};
    use crate::plan::MemoryPolicy;
    use crate::runtime::LoggingOptions;
    use crate::template::{WorkloadKind, preset};
    use tempfile::TempDir;

    fn runtime(dir: &TempDir, hv: &Arc<FakeHypervisor>) -> ForgeRuntime {
        let mut options = ForgeOptions::with_home_dir(dir.path().join("home"));
        options.logging = LoggingOptions {
            log_to_file: false,
            ..Default::default()
        };
        ForgeRuntime::with_hypervisor(options, Arc::clone(hv) as Arc<dyn HypervisorCapability>)
            .unwrap()
    }

    fn request(id: TemplateId, name: &str) -> ProvisionRequest {
        ProvisionRequest {
            template_id: id,
            instance_name: name.into(),
            network: NetworkRef::new("External"),
            overrides: FieldOverrides::default(),
            start: false,
        }
    }

    #[test]
    fn test_new_prepares_layout() {
        let dir = TempDir::new().unwrap();
        let hv = Arc::new(FakeHypervisor::new(&["External"], &[]));
        let rt = runtime(&dir, &hv);

        assert!(rt.layout().db_path().exists());
        assert!(rt.layout().state_dir().is_dir());
        assert_eq!(
            rt.stage_controller().path(),
            rt.layout().stage_record_path().as_path()
        );
    }

    #[test]
    fn test_relative_home_rejected() {
        let hv = Arc::new(FakeHypervisor::default());
        let result = ForgeRuntime::with_hypervisor(
            ForgeOptions::with_home_dir("relative"),
            hv as Arc<dyn HypervisorCapability>,
        );
        assert!(matches!(result, Err(ForgeError::Config(_))));
    }

    #[test]
    fn test_template_lifecycle() {
        let dir = TempDir::new().unwrap();
        let hv = Arc::new(FakeHypervisor::new(&["External"], &[]));
        let rt = runtime(&dir, &hv);

        let spec = preset(WorkloadKind::WebServer).unwrap();
        let first = rt.save_template("web", &spec).unwrap();
        let second = rt.save_template("web", &spec).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.engine_version, env!("CARGO_PKG_VERSION"));

        let ids: Vec<_> = rt.list_templates().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);

        rt.delete_template(&first.id).unwrap();
        assert!(matches!(
            rt.load_template(&first.id),
            Err(ForgeError::NotFound(_))
        ));
        assert_eq!(rt.load_template(&second.id).unwrap().spec, spec);
    }

    #[tokio::test]
    async fn test_plan_instance_with_overrides() {
        let dir = TempDir::new().unwrap();
        let hv = Arc::new(FakeHypervisor::new(&["External"], &["DC01"]));
        let rt = runtime(&dir, &hv);
        let record = rt
            .save_template("app", &preset(WorkloadKind::ApplicationServer).unwrap())
            .unwrap();

        let mut req = request(record.id, "APP01");
        req.overrides.memory_mb = Some(16384);
        let plan = rt.plan_instance(&req).await.unwrap();

        assert_eq!(plan.cpu_count, 4);
        assert_eq!(
            plan.memory,
            MemoryPolicy::Dynamic {
                startup_mb: 16384,
                minimum_mb: 8192,
                maximum_mb: 32768
            }
        );
        assert_eq!(plan.template.id, Some(record.id));
        assert_eq!(plan.template.name, "app");
        // Planning makes no changes
        assert!(hv.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plan_instance_errors() {
        let dir = TempDir::new().unwrap();
        let hv = Arc::new(FakeHypervisor::new(&["External"], &["DC01"]));
        let rt = runtime(&dir, &hv);
        let record = rt
            .save_template("dc", &preset(WorkloadKind::DomainController).unwrap())
            .unwrap();

        let err = rt.plan_instance(&request(record.id, "dc01")).await.unwrap_err();
        assert!(matches!(err, ForgeError::NameCollision(_)));

        let mut req = request(record.id, "DC02");
        req.network = NetworkRef::new("Internal");
        let err = rt.plan_instance(&req).await.unwrap_err();
        assert!(matches!(err, ForgeError::NoNetworkTarget(_)));

        let err = rt
            .plan_instance(&request(TemplateId::new(), "DC02"))
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_provision_end_to_end() {
        let dir = TempDir::new().unwrap();
        let hv = Arc::new(FakeHypervisor::new(&["External"], &[]));
        let rt = runtime(&dir, &hv);
        let record = rt
            .save_template("web", &preset(WorkloadKind::WebServer).unwrap())
            .unwrap();

        let mut req = request(record.id, "WEB01");
        req.start = true;
        let done = rt.provision(&req).await.unwrap().into_result().unwrap();

        assert_eq!(done.handle.name, "WEB01");
        assert!(done.started);
        assert!(matches!(hv.calls().last(), Some(Call::Start)));

        // Same name again now collides
        let err = rt.provision(&req).await.unwrap_err();
        assert!(matches!(err, ForgeError::NameCollision(_)));
    }

    #[tokio::test]
    async fn test_stage_record_lives_under_home() {
        let dir = TempDir::new().unwrap();
        let hv = Arc::new(FakeHypervisor::default());
        let rt = runtime(&dir, &hv);

        let controller = rt.stage_controller();
        assert_eq!(controller.resume_state(), WorkflowState::NotStarted);
        controller.advance::<()>(1, "network-identity", None).unwrap();

        assert!(rt.layout().stage_record_path().exists());
        assert_eq!(rt.stage_controller().resume(), 2);
    }
}
