//! Provisioning planner.
//!
//! Turns a template spec plus per-instance choices into a concrete,
//! validated [`ProvisioningPlan`]. Planning is a pure function of its
//! inputs: the caller supplies the current instance names and available
//! networks (both come from capability calls), so identical inputs always
//! produce identical plans.

use crate::hypervisor::NetworkRef;
use crate::template::{Generation, MAX_MEMORY_MB, TemplateId, TemplateSpec, WorkloadKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use vmforge_shared::{ForgeError, ForgeResult};

/// Lower bound for the dynamic memory minimum.
pub const MIN_DYNAMIC_MEMORY_MB: u64 = 512;

/// Longest instance name accepted (NetBIOS computer name limit).
pub const MAX_INSTANCE_NAME_LEN: usize = 15;

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * BYTES_PER_MB;

/// Saturates instead of wrapping; validated sizes never reach the limit.
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(BYTES_PER_MB)
}

pub fn gb_to_bytes(gb: u64) -> u64 {
    gb.saturating_mul(BYTES_PER_GB)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MemoryPolicy {
    Static {
        memory_mb: u64,
    },
    Dynamic {
        startup_mb: u64,
        minimum_mb: u64,
        maximum_mb: u64,
    },
}

impl MemoryPolicy {
    /// Resolve the policy for a template memory size.
    ///
    /// Dynamic bounds are `min = max(512, M/2)` and `max = 2M`, starting at `M`.
    /// The maximum is capped at the host limit.
    pub fn resolve(memory_mb: u64, dynamic: bool) -> Self {
        if dynamic {
            MemoryPolicy::Dynamic {
                startup_mb: memory_mb,
                minimum_mb: (memory_mb / 2).max(MIN_DYNAMIC_MEMORY_MB),
                maximum_mb: memory_mb.saturating_mul(2).min(MAX_MEMORY_MB),
            }
        } else {
            MemoryPolicy::Static { memory_mb }
        }
    }

    pub fn startup_mb(&self) -> u64 {
        match self {
            MemoryPolicy::Static { memory_mb } => *memory_mb,
            MemoryPolicy::Dynamic { startup_mb, .. } => *startup_mb,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, MemoryPolicy::Dynamic { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskRole {
    Os,
    Data,
    Log,
}

impl DiskRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskRole::Os => "os",
            DiskRole::Data => "data",
            DiskRole::Log => "log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPlan {
    pub role: DiskRole,
    pub size_gb: u64,
}

impl DiskPlan {
    pub fn size_bytes(&self) -> u64 {
        gb_to_bytes(self.size_gb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterPlan {
    /// Total adapters, including the one bound at creation.
    pub count: u32,
    pub network: NetworkRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwarePlan {
    pub generation: Generation,
    pub secure_boot: bool,
}

/// Reference to the template a plan was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub id: Option<TemplateId>,
    pub name: String,
}

impl TemplateRef {
    pub fn unsaved(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

/// A validated, instance-specific resource request.
///
/// Plans are not persisted and are single-use: executing one whose instance
/// name already exists fails with `NameCollision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    pub instance_name: String,
    pub template: TemplateRef,
    pub workload: WorkloadKind,
    pub cpu_count: u32,
    pub memory: MemoryPolicy,
    /// Ordered: OS first, then Data and Log for database servers.
    pub disks: Vec<DiskPlan>,
    pub adapters: AdapterPlan,
    pub firmware: FirmwarePlan,
    pub enhanced_session: bool,
}

/// Inputs to [`plan`].
pub struct PlanInput<'a> {
    pub spec: &'a TemplateSpec,
    pub template: TemplateRef,
    pub instance_name: &'a str,
    pub network: &'a NetworkRef,
    /// Instance names currently present on the host.
    pub existing_names: &'a BTreeSet<String>,
    /// Networks currently available on the host.
    pub available_networks: &'a [NetworkRef],
}

fn validate_instance_name(name: &str) -> ForgeResult<()> {
    if name.is_empty() {
        return Err(ForgeError::validation(
            "instance_name",
            "must not be empty",
        ));
    }
    if name.len() > MAX_INSTANCE_NAME_LEN {
        return Err(ForgeError::validation(
            "instance_name",
            format!(
                "'{}' is longer than {} characters",
                name, MAX_INSTANCE_NAME_LEN
            ),
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
    {
        return Err(ForgeError::validation(
            "instance_name",
            format!("'{}' contains invalid character '{}'", name, c),
        ));
    }
    Ok(())
}

/// Build a provisioning plan.
///
/// Fails with `Validation` for a bad spec or instance name, `NameCollision`
/// if the name is already used (case-insensitively), and `NoNetworkTarget`
/// if the network is not among the available ones.
pub fn plan(input: PlanInput<'_>) -> ForgeResult<ProvisioningPlan> {
    let PlanInput {
        spec,
        template,
        instance_name,
        network,
        existing_names,
        available_networks,
    } = input;

    spec.validate()?;

    let instance_name = instance_name.trim();
    validate_instance_name(instance_name)?;

    if existing_names
        .iter()
        .any(|existing| existing.eq_ignore_ascii_case(instance_name))
    {
        return Err(ForgeError::NameCollision(instance_name.to_string()));
    }

    let network = available_networks
        .iter()
        .find(|available| available.matches(network))
        .ok_or_else(|| ForgeError::NoNetworkTarget(network.to_string()))?;

    let hw = &spec.hardware;

    let mut disks = vec![DiskPlan {
        role: DiskRole::Os,
        size_gb: hw.os_disk_gb,
    }];
    if let Some((data_disk_gb, log_disk_gb)) = spec.secondary_disks() {
        disks.push(DiskPlan {
            role: DiskRole::Data,
            size_gb: data_disk_gb,
        });
        disks.push(DiskPlan {
            role: DiskRole::Log,
            size_gb: log_disk_gb,
        });
    }

    Ok(ProvisioningPlan {
        instance_name: instance_name.to_string(),
        template,
        workload: spec.kind(),
        cpu_count: hw.cpu_count,
        memory: MemoryPolicy::resolve(hw.memory_mb, hw.dynamic_memory),
        disks,
        adapters: AdapterPlan {
            count: hw.adapter_count,
            // Use the host's spelling of the switch name.
            network: network.clone(),
        },
        firmware: FirmwarePlan {
            generation: hw.generation,
            secure_boot: hw.secure_boot,
        },
        enhanced_session: spec.enhanced_session(),
    })
}
