//! Hardware templates.
//!
//! A template is a named, reusable hardware specification. The spec itself
//! ([`TemplateSpec`]) is a common hardware shape plus a per-workload
//! [`WorkloadProfile`] that carries the fields only some classes have:
//!
//! ```text
//! TemplateSpec
//! ├── HardwareSpec      cpu / memory / os disk / adapters / generation / flags
//! └── WorkloadProfile
//!     ├── DatabaseServer { data_disk_gb, log_disk_gb }
//!     ├── Vdi { enhanced_session }
//!     └── DomainController | ApplicationServer | WebServer | Custom
//! ```
//!
//! Specs come from the [`catalog`] (presets or the custom builder), may be
//! amended with [`FieldOverrides`], and are persisted through a
//! [`TemplateStore`] as immutable [`TemplateRecord`]s.

pub mod catalog;
mod store;

pub use catalog::{CustomFields, FieldOverrides, apply_overrides, build_custom, preset};
pub use store::TemplateStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;
use vmforge_shared::{ForgeError, ForgeResult};

/// Workload class of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    DomainController,
    ApplicationServer,
    DatabaseServer,
    WebServer,
    Vdi,
    Custom,
}

impl WorkloadKind {
    pub const PRESETS: [WorkloadKind; 5] = [
        WorkloadKind::DomainController,
        WorkloadKind::ApplicationServer,
        WorkloadKind::DatabaseServer,
        WorkloadKind::WebServer,
        WorkloadKind::Vdi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::DomainController => "domain-controller",
            WorkloadKind::ApplicationServer => "application-server",
            WorkloadKind::DatabaseServer => "database-server",
            WorkloadKind::WebServer => "web-server",
            WorkloadKind::Vdi => "vdi",
            WorkloadKind::Custom => "custom",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "domain-controller" | "dc" => Ok(WorkloadKind::DomainController),
            "application-server" | "app" => Ok(WorkloadKind::ApplicationServer),
            "database-server" | "db" | "sql" => Ok(WorkloadKind::DatabaseServer),
            "web-server" | "web" => Ok(WorkloadKind::WebServer),
            "vdi" => Ok(WorkloadKind::Vdi),
            "custom" => Ok(WorkloadKind::Custom),
            _ => Err(ForgeError::validation(
                "workload",
                format!("unknown workload type '{}'", s),
            )),
        }
    }
}

/// VM generation. Generation 2 boots UEFI and supports secure boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Generation {
    Gen1,
    Gen2,
}

impl Generation {
    pub fn number(&self) -> u8 {
        match self {
            Generation::Gen1 => 1,
            Generation::Gen2 => 2,
        }
    }

    pub fn from_number(n: u8) -> ForgeResult<Self> {
        match n {
            1 => Ok(Generation::Gen1),
            2 => Ok(Generation::Gen2),
            other => Err(ForgeError::validation(
                "generation",
                format!("must be 1 or 2, got {}", other),
            )),
        }
    }
}

/// Largest memory assignment Hyper-V accepts for one VM (12 TB).
pub const MAX_MEMORY_MB: u64 = 12 * 1024 * 1024;

/// Largest VHDX Hyper-V can create (64 TB).
pub const MAX_DISK_GB: u64 = 64 * 1024;

fn check_size(field: &str, value: u64, max: u64, unit: &str) -> ForgeResult<()> {
    if value == 0 {
        return Err(ForgeError::validation(field, "must be greater than zero"));
    }
    if value > max {
        return Err(ForgeError::validation(
            field,
            format!("must be at most {} {}, got {}", max, unit, value),
        ));
    }
    Ok(())
}

/// Hardware fields shared by every workload class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSpec {
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub os_disk_gb: u64,
    pub adapter_count: u32,
    pub generation: Generation,
    pub dynamic_memory: bool,
    pub secure_boot: bool,
}

/// Class-specific part of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "workload", rename_all = "snake_case")]
pub enum WorkloadProfile {
    DomainController,
    ApplicationServer,
    DatabaseServer { data_disk_gb: u64, log_disk_gb: u64 },
    WebServer,
    Vdi { enhanced_session: bool },
    Custom,
}

impl WorkloadProfile {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            WorkloadProfile::DomainController => WorkloadKind::DomainController,
            WorkloadProfile::ApplicationServer => WorkloadKind::ApplicationServer,
            WorkloadProfile::DatabaseServer { .. } => WorkloadKind::DatabaseServer,
            WorkloadProfile::WebServer => WorkloadKind::WebServer,
            WorkloadProfile::Vdi { .. } => WorkloadKind::Vdi,
            WorkloadProfile::Custom => WorkloadKind::Custom,
        }
    }
}

/// A complete hardware template, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub hardware: HardwareSpec,
    pub profile: WorkloadProfile,
}

impl TemplateSpec {
    pub fn kind(&self) -> WorkloadKind {
        self.profile.kind()
    }

    /// Data and log disk sizes, present only for database servers.
    pub fn secondary_disks(&self) -> Option<(u64, u64)> {
        match self.profile {
            WorkloadProfile::DatabaseServer {
                data_disk_gb,
                log_disk_gb,
            } => Some((data_disk_gb, log_disk_gb)),
            _ => None,
        }
    }

    pub fn enhanced_session(&self) -> bool {
        matches!(
            self.profile,
            WorkloadProfile::Vdi {
                enhanced_session: true
            }
        )
    }

    /// Check every template invariant, naming the first offending field.
    pub fn validate(&self) -> ForgeResult<()> {
        let hw = &self.hardware;

        if hw.cpu_count == 0 {
            return Err(ForgeError::validation(
                "cpu_count",
                "must be greater than zero",
            ));
        }
        check_size("memory_mb", hw.memory_mb, MAX_MEMORY_MB, "MB")?;
        check_size("os_disk_gb", hw.os_disk_gb, MAX_DISK_GB, "GB")?;
        if hw.adapter_count < 1 {
            return Err(ForgeError::validation(
                "adapter_count",
                "at least one network adapter is required",
            ));
        }
        if hw.secure_boot && hw.generation != Generation::Gen2 {
            return Err(ForgeError::validation(
                "secure_boot",
                "secure boot requires generation 2",
            ));
        }
        if let Some((data_disk_gb, log_disk_gb)) = self.secondary_disks() {
            check_size("data_disk_gb", data_disk_gb, MAX_DISK_GB, "GB")?;
            check_size("log_disk_gb", log_disk_gb, MAX_DISK_GB, "GB")?;
        }

        Ok(())
    }
}

/// Identifier of a persisted template (ULID, sortable by creation time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(Ulid);

impl TemplateId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TemplateId {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim())
            .map(TemplateId)
            .map_err(|e| ForgeError::NotFound(format!("template '{}' ({})", s, e)))
    }
}

/// A persisted template. Immutable: saving again creates a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: TemplateId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Version of vmforge that wrote the record.
    pub engine_version: String,
    pub spec: TemplateSpec,
}
