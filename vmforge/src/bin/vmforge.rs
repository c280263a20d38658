//! vmforge - command-line front end.
//!
//! # Usage
//!
//! ```bash
//! # Inspect the built-in presets
//! vmforge template presets
//!
//! # Save a database server template with a bigger data disk
//! vmforge template create --name sql-large --workload db --data-disk-gb 1000
//!
//! # Plan without creating anything, then provision and start
//! vmforge provision --template 01J... --name SQL01 --network External --dry-run
//! vmforge provision --template 01J... --name SQL01 --network External --start
//!
//! # Where is the host deployment?
//! vmforge deploy status
//! ```

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use vmforge::deploy::StageController;
use vmforge::template::{CustomFields, apply_overrides, build_custom, preset};
use vmforge::{
    ExecutionOutcome, FieldOverrides, ForgeOptions, ForgeRuntime, Generation, NetworkRef,
    ProvisionRequest, TemplateId, TemplateRecord, TemplateSpec, WorkloadKind, WorkflowState,
};

#[derive(Parser)]
#[command(name = "vmforge")]
#[command(version)]
#[command(about = "Template-driven VM provisioning and resumable host deployment")]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalOptions {
    /// Home directory for the database, logs and deployment state.
    ///
    /// Defaults to `$VMFORGE_HOME`, then `~/.vmforge`.
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// JSON options file. `--home` takes precedence over its `home_dir`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Log to stderr at debug level instead of the log file.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage hardware templates.
    #[command(subcommand)]
    Template(TemplateCommand),

    /// Create a virtual machine from a saved template.
    Provision(ProvisionArgs),

    /// Inspect or reset the host deployment stage.
    #[command(subcommand)]
    Deploy(DeployCommand),
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Show the built-in presets.
    Presets,
    /// Save a template from a preset or from explicit fields.
    Create(CreateArgs),
    /// List saved templates in storage order.
    List,
    /// Show one saved template.
    Show { id: TemplateId },
    /// Delete a saved template.
    Delete { id: TemplateId },
}

#[derive(Subcommand)]
enum DeployCommand {
    /// Show the recorded deployment stage.
    Status,
    /// Forget the recorded stage so the next run starts fresh.
    Reset,
}

/// Hardware fields accepted by `template create` and `provision`.
#[derive(Args, Clone, Default)]
struct HardwareArgs {
    #[arg(long)]
    cpu: Option<u32>,
    #[arg(long)]
    memory_mb: Option<u64>,
    #[arg(long)]
    os_disk_gb: Option<u64>,
    #[arg(long)]
    data_disk_gb: Option<u64>,
    #[arg(long)]
    log_disk_gb: Option<u64>,
    #[arg(long)]
    adapters: Option<u32>,
    /// 1 or 2.
    #[arg(long)]
    generation: Option<u8>,
    #[arg(long)]
    dynamic_memory: Option<bool>,
    #[arg(long)]
    secure_boot: Option<bool>,
    #[arg(long)]
    enhanced_session: Option<bool>,
}

impl HardwareArgs {
    fn generation(&self) -> Result<Option<Generation>> {
        Ok(self.generation.map(Generation::from_number).transpose()?)
    }

    fn overrides(&self) -> Result<FieldOverrides> {
        Ok(FieldOverrides {
            cpu_count: self.cpu,
            memory_mb: self.memory_mb,
            os_disk_gb: self.os_disk_gb,
            data_disk_gb: self.data_disk_gb,
            log_disk_gb: self.log_disk_gb,
            adapter_count: self.adapters,
            generation: self.generation()?,
            dynamic_memory: self.dynamic_memory,
            secure_boot: self.secure_boot,
            enhanced_session: self.enhanced_session,
        })
    }

    /// Hardware fields for the custom builder; class-specific fields stay
    /// as overrides so they are rejected with the field name.
    fn split_custom(&self) -> Result<(CustomFields, FieldOverrides)> {
        let custom = CustomFields {
            cpu_count: self.cpu,
            memory_mb: self.memory_mb,
            os_disk_gb: self.os_disk_gb,
            adapter_count: self.adapters,
            generation: self.generation()?,
            dynamic_memory: self.dynamic_memory,
            secure_boot: self.secure_boot,
        };
        let class_specific = FieldOverrides {
            data_disk_gb: self.data_disk_gb,
            log_disk_gb: self.log_disk_gb,
            enhanced_session: self.enhanced_session,
            ..Default::default()
        };
        Ok((custom, class_specific))
    }
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long)]
    name: String,
    /// domain-controller, application-server, database-server, web-server, vdi or custom.
    #[arg(long)]
    workload: WorkloadKind,
    #[command(flatten)]
    hardware: HardwareArgs,
}

#[derive(Args)]
struct ProvisionArgs {
    #[arg(long)]
    template: TemplateId,
    /// Instance name.
    #[arg(long)]
    name: String,
    /// Virtual switch to connect adapters to.
    #[arg(long)]
    network: String,
    /// Start the instance once configured.
    #[arg(long)]
    start: bool,
    /// Print the plan and stop.
    #[arg(long)]
    dry_run: bool,
    #[command(flatten)]
    hardware: HardwareArgs,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn describe(spec: &TemplateSpec) -> String {
    let hw = &spec.hardware;
    let mut line = format!(
        "{} CPU / {} MB{} / {} GB OS / {} adapter(s) / gen {} / secure boot {}",
        hw.cpu_count,
        hw.memory_mb,
        if hw.dynamic_memory { " dynamic" } else { "" },
        hw.os_disk_gb,
        hw.adapter_count,
        hw.generation.number(),
        if hw.secure_boot { "on" } else { "off" },
    );
    if let Some((data, log)) = spec.secondary_disks() {
        line.push_str(&format!(" / data {} GB / log {} GB", data, log));
    }
    if spec.enhanced_session() {
        line.push_str(" / enhanced session");
    }
    line
}

fn print_record(record: &TemplateRecord) {
    println!(
        "{}  {:<20} {:<20} {}",
        record.id,
        record.name,
        record.spec.kind().as_str(),
        describe(&record.spec)
    );
}

fn load_options(global: &GlobalOptions) -> Result<ForgeOptions> {
    let mut options = match &global.config {
        Some(path) => ForgeOptions::from_file(path)?,
        None => ForgeOptions::default(),
    };
    if let Some(home) = &global.home {
        options.home_dir = std::path::absolute(home)
            .with_context(|| format!("invalid home directory {}", home.display()))?;
    }
    if global.verbose {
        options.logging.level = "debug".into();
        options.logging.log_to_file = false;
    }
    Ok(options)
}

fn template_command(runtime: &ForgeRuntime, command: TemplateCommand, json: bool) -> Result<()> {
    match command {
        TemplateCommand::Presets => {
            let presets = WorkloadKind::PRESETS
                .iter()
                .map(|kind| -> Result<_> { Ok((kind.as_str(), preset(*kind)?)) })
                .collect::<Result<Vec<_>>>()?;
            if json {
                let map: serde_json::Map<_, _> = presets
                    .iter()
                    .map(|(name, spec)| -> Result<_> {
                        Ok((name.to_string(), serde_json::to_value(spec)?))
                    })
                    .collect::<Result<_>>()?;
                return print_json(&map);
            }
            for (name, spec) in presets {
                println!("{:<20} {}", name, describe(&spec));
            }
        }
        TemplateCommand::Create(args) => {
            let spec = if args.workload == WorkloadKind::Custom {
                let (custom, class_specific) = args.hardware.split_custom()?;
                let spec = build_custom(&custom)?;
                if class_specific.is_empty() {
                    spec
                } else {
                    apply_overrides(&spec, &class_specific)?
                }
            } else {
                let overrides = args.hardware.overrides()?;
                let spec = preset(args.workload)?;
                if overrides.is_empty() {
                    spec
                } else {
                    apply_overrides(&spec, &overrides)?
                }
            };
            let record = runtime.save_template(&args.name, &spec)?;
            if json {
                return print_json(&record);
            }
            println!("Saved template {} ({})", record.name, record.id);
        }
        TemplateCommand::List => {
            let records = runtime.list_templates()?;
            if json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("No templates saved");
            }
            for record in &records {
                print_record(record);
            }
        }
        TemplateCommand::Show { id } => {
            let record = runtime.load_template(&id)?;
            if json {
                return print_json(&record);
            }
            print_record(&record);
            println!(
                "created {} by engine {}",
                record.created_at.to_rfc3339(),
                record.engine_version
            );
        }
        TemplateCommand::Delete { id } => {
            runtime.delete_template(&id)?;
            if !json {
                println!("Deleted template {}", id);
            }
        }
    }
    Ok(())
}

async fn provision_command(runtime: &ForgeRuntime, args: ProvisionArgs, json: bool) -> Result<()> {
    let request = ProvisionRequest {
        template_id: args.template,
        instance_name: args.name,
        network: NetworkRef::new(args.network),
        overrides: args.hardware.overrides()?,
        start: args.start,
    };

    if args.dry_run {
        let plan = runtime.plan_instance(&request).await?;
        if json {
            return print_json(&plan);
        }
        println!("{:#?}", plan);
        return Ok(());
    }

    match runtime.provision(&request).await? {
        ExecutionOutcome::Completed(done) => {
            if json {
                return print_json(&serde_json::json!({
                    "status": "completed",
                    "handle": done.handle,
                    "steps": done.steps,
                    "disks": done.disks,
                    "started": done.started,
                    "metrics": done.metrics,
                }));
            }
            println!("Provisioned {}", done.handle);
            for disk in &done.disks {
                println!("  {:<5} {}", disk.role.as_str(), disk.path.display());
            }
            Ok(())
        }
        ExecutionOutcome::Partial(partial) => {
            if json {
                print_json(&serde_json::json!({
                    "status": "partial",
                    "handle": partial.handle,
                    "failed_step": partial.failed_step,
                    "completed_steps": partial.completed_steps,
                    "error": partial.error.to_string(),
                }))?;
            }
            bail!(
                "{} was created but left partially configured: step {} ({}) failed: {}",
                partial.handle,
                partial.failed_step.index(),
                partial.failed_step,
                partial.error
            )
        }
    }
}

fn deploy_command(controller: StageController, command: DeployCommand, json: bool) -> Result<()> {
    match command {
        DeployCommand::Status => {
            let state = controller.resume_state();
            let record = controller.read_record();
            if json {
                return print_json(&serde_json::json!({
                    "state": state,
                    "next_stage": controller.resume(),
                    "path": controller.path(),
                    "trigger": record.as_ref().and_then(|r| r.trigger.clone()),
                    "updated_at": record.as_ref().map(|r| r.updated_at),
                }));
            }
            match state {
                WorkflowState::NotStarted => println!("No deployment in progress"),
                WorkflowState::InProgress(stage) => println!("Paused before stage {}", stage),
                WorkflowState::Completed => println!("Last deployment completed"),
            }
            if let Some(record) = record {
                println!(
                    "recorded {} after {}",
                    record.updated_at.to_rfc3339(),
                    record.trigger.as_deref().unwrap_or("unknown")
                );
            }
        }
        DeployCommand::Reset => {
            controller.reset()?;
            if !json {
                println!("Deployment stage cleared");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = load_options(&cli.global)?;
    let runtime = ForgeRuntime::new(options).context("failed to initialize vmforge")?;
    let json = cli.global.json;

    match cli.command {
        Commands::Template(command) => template_command(&runtime, command, json),
        Commands::Provision(args) => provision_command(&runtime, args, json).await,
        Commands::Deploy(command) => deploy_command(runtime.stage_controller(), command, json),
    }
}
