//! Hypervisor capability surface.
//!
//! The provisioning engine never talks to a hypervisor directly. It issues
//! capability calls through [`HypervisorCapability`]; the concrete control
//! plane (Hyper-V via PowerShell in [`PowerShellHypervisor`]) lives behind it.

mod powershell;

#[cfg(test)]
pub(crate) mod fake;

pub use powershell::PowerShellHypervisor;

use crate::plan::{DiskRole, MemoryPolicy};
use crate::template::Generation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use vmforge_shared::ForgeResult;

/// Name of a virtual switch an adapter can connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkRef(pub String);

impl NetworkRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Switch names are case-insensitive on the host.
    pub fn matches(&self, other: &NetworkRef) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for NetworkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to an instance returned by the hypervisor at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    /// Hypervisor-assigned identifier.
    pub id: String,
    pub name: String,
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A virtual disk created by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRef {
    pub path: PathBuf,
    pub role: DiskRole,
    pub size_bytes: u64,
}

/// Capability name requesting enhanced session mode (console over VMBus).
///
/// Not a Hyper-V integration service: it is a host setting plus the VM's
/// session transport, so adapters handle it separately.
pub const ENHANCED_SESSION: &str = "EnhancedSession";

/// Operations the provisioning engine needs from the hypervisor host.
///
/// Calls are not idempotent and are never retried by the engine.
#[async_trait::async_trait]
pub trait HypervisorCapability: Send + Sync {
    async fn list_instance_names(&self) -> ForgeResult<BTreeSet<String>>;

    async fn list_networks(&self) -> ForgeResult<Vec<NetworkRef>>;

    async fn create_instance(
        &self,
        name: &str,
        generation: Generation,
        initial_memory_bytes: u64,
        network: &NetworkRef,
    ) -> ForgeResult<InstanceHandle>;

    async fn set_processor_count(&self, handle: &InstanceHandle, count: u32) -> ForgeResult<()>;

    async fn set_memory_policy(
        &self,
        handle: &InstanceHandle,
        policy: &MemoryPolicy,
    ) -> ForgeResult<()>;

    async fn set_firmware(&self, handle: &InstanceHandle, secure_boot: bool) -> ForgeResult<()>;

    /// Create an unattached disk for `instance_name`.
    async fn create_disk(
        &self,
        instance_name: &str,
        role: DiskRole,
        size_bytes: u64,
    ) -> ForgeResult<DiskRef>;

    async fn attach_disk(&self, handle: &InstanceHandle, disk: &DiskRef) -> ForgeResult<()>;

    async fn add_network_adapter(
        &self,
        handle: &InstanceHandle,
        network: &NetworkRef,
    ) -> ForgeResult<()>;

    async fn enable_integration_service(
        &self,
        handle: &InstanceHandle,
        name: &str,
    ) -> ForgeResult<()>;

    async fn start_instance(&self, handle: &InstanceHandle) -> ForgeResult<()>;
}
