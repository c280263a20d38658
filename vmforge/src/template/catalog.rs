//! Built-in presets, the custom template builder, and field overrides.

use super::{Generation, HardwareSpec, TemplateSpec, WorkloadKind, WorkloadProfile};
use serde::{Deserialize, Serialize};
use vmforge_shared::{ForgeError, ForgeResult};

/// Defaults applied by [`build_custom`] to omitted fields.
pub mod defaults {
    pub const CPU_COUNT: u32 = 2;
    pub const MEMORY_MB: u64 = 4096;
    pub const OS_DISK_GB: u64 = 80;
    pub const ADAPTER_COUNT: u32 = 1;
    pub const DYNAMIC_MEMORY: bool = true;
}

fn hardware(
    cpu_count: u32,
    memory_mb: u64,
    os_disk_gb: u64,
    adapter_count: u32,
    dynamic_memory: bool,
) -> HardwareSpec {
    HardwareSpec {
        cpu_count,
        memory_mb,
        os_disk_gb,
        adapter_count,
        generation: Generation::Gen2,
        dynamic_memory,
        secure_boot: true,
    }
}

/// Get the built-in template for a workload class.
///
/// `Custom` has no preset; use [`build_custom`] instead.
pub fn preset(kind: WorkloadKind) -> ForgeResult<TemplateSpec> {
    let spec = match kind {
        WorkloadKind::DomainController => TemplateSpec {
            // Directory services keep a fixed memory allocation.
            hardware: hardware(2, 4096, 80, 1, false),
            profile: WorkloadProfile::DomainController,
        },
        WorkloadKind::ApplicationServer => TemplateSpec {
            hardware: hardware(4, 8192, 120, 2, true),
            profile: WorkloadProfile::ApplicationServer,
        },
        WorkloadKind::DatabaseServer => TemplateSpec {
            hardware: hardware(8, 16384, 150, 2, false),
            profile: WorkloadProfile::DatabaseServer {
                data_disk_gb: 500,
                log_disk_gb: 100,
            },
        },
        WorkloadKind::WebServer => TemplateSpec {
            hardware: hardware(2, 4096, 80, 1, true),
            profile: WorkloadProfile::WebServer,
        },
        WorkloadKind::Vdi => TemplateSpec {
            hardware: hardware(2, 4096, 60, 1, true),
            profile: WorkloadProfile::Vdi {
                enhanced_session: true,
            },
        },
        WorkloadKind::Custom => {
            return Err(ForgeError::validation(
                "workload",
                "custom templates have no preset; build one from explicit fields",
            ));
        }
    };

    Ok(spec)
}

/// User-supplied fields for a custom template. `None` means "use the default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFields {
    pub cpu_count: Option<u32>,
    pub memory_mb: Option<u64>,
    pub os_disk_gb: Option<u64>,
    pub adapter_count: Option<u32>,
    pub generation: Option<Generation>,
    pub dynamic_memory: Option<bool>,
    pub secure_boot: Option<bool>,
}

/// Build and validate a custom template.
///
/// Omitted fields take the values in [`defaults`]. Generation defaults to 2;
/// secure boot defaults to on for generation 2 and off for generation 1, so
/// asking only for a generation 1 machine yields a valid spec.
pub fn build_custom(fields: &CustomFields) -> ForgeResult<TemplateSpec> {
    let generation = fields.generation.unwrap_or(Generation::Gen2);
    let secure_boot = fields
        .secure_boot
        .unwrap_or(generation == Generation::Gen2);

    let spec = TemplateSpec {
        hardware: HardwareSpec {
            cpu_count: fields.cpu_count.unwrap_or(defaults::CPU_COUNT),
            memory_mb: fields.memory_mb.unwrap_or(defaults::MEMORY_MB),
            os_disk_gb: fields.os_disk_gb.unwrap_or(defaults::OS_DISK_GB),
            adapter_count: fields.adapter_count.unwrap_or(defaults::ADAPTER_COUNT),
            generation,
            dynamic_memory: fields.dynamic_memory.unwrap_or(defaults::DYNAMIC_MEMORY),
            secure_boot,
        },
        profile: WorkloadProfile::Custom,
    };

    spec.validate()?;
    Ok(spec)
}

/// Sparse set of field replacements applied before a template is saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOverrides {
    pub cpu_count: Option<u32>,
    pub memory_mb: Option<u64>,
    pub os_disk_gb: Option<u64>,
    pub data_disk_gb: Option<u64>,
    pub log_disk_gb: Option<u64>,
    pub adapter_count: Option<u32>,
    pub generation: Option<Generation>,
    pub dynamic_memory: Option<bool>,
    pub secure_boot: Option<bool>,
    pub enhanced_session: Option<bool>,
}

impl FieldOverrides {
    pub fn is_empty(&self) -> bool {
        self == &FieldOverrides::default()
    }
}

/// Apply overrides to a copy of `spec` and re-validate the result.
///
/// Class-specific fields (data/log disks, enhanced session) may only be
/// overridden on templates of the matching class.
pub fn apply_overrides(spec: &TemplateSpec, overrides: &FieldOverrides) -> ForgeResult<TemplateSpec> {
    let mut spec = spec.clone();
    let hw = &mut spec.hardware;

    if let Some(v) = overrides.cpu_count {
        hw.cpu_count = v;
    }
    if let Some(v) = overrides.memory_mb {
        hw.memory_mb = v;
    }
    if let Some(v) = overrides.os_disk_gb {
        hw.os_disk_gb = v;
    }
    if let Some(v) = overrides.adapter_count {
        hw.adapter_count = v;
    }
    if let Some(v) = overrides.generation {
        hw.generation = v;
    }
    if let Some(v) = overrides.dynamic_memory {
        hw.dynamic_memory = v;
    }
    if let Some(v) = overrides.secure_boot {
        hw.secure_boot = v;
    }

    let kind = spec.kind();
    match &mut spec.profile {
        WorkloadProfile::DatabaseServer {
            data_disk_gb,
            log_disk_gb,
        } => {
            if let Some(v) = overrides.data_disk_gb {
                *data_disk_gb = v;
            }
            if let Some(v) = overrides.log_disk_gb {
                *log_disk_gb = v;
            }
        }
        _ => {
            for (field, set) in [
                ("data_disk_gb", overrides.data_disk_gb.is_some()),
                ("log_disk_gb", overrides.log_disk_gb.is_some()),
            ] {
                if set {
                    return Err(ForgeError::validation(
                        field,
                        format!("only database-server templates have this disk, not {}", kind),
                    ));
                }
            }
        }
    }

    match &mut spec.profile {
        WorkloadProfile::Vdi { enhanced_session } => {
            if let Some(v) = overrides.enhanced_session {
                *enhanced_session = v;
            }
        }
        _ if overrides.enhanced_session.is_some() => {
            return Err(ForgeError::validation(
                "enhanced_session",
                format!("only vdi templates support enhanced session mode, not {}", kind),
            ));
        }
        _ => {}
    }

    spec.validate()?;
    Ok(spec)
}
