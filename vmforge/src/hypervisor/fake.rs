//! In-memory hypervisor for tests: records calls and injects failures.

use super::{DiskRef, HypervisorCapability, InstanceHandle, NetworkRef};
use crate::plan::{DiskRole, MemoryPolicy};
use crate::template::Generation;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use vmforge_shared::errors::{ForgeError, ForgeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    CreateInstance {
        name: String,
        generation: Generation,
        memory_bytes: u64,
        network: String,
    },
    SetProcessor(u32),
    SetMemory(MemoryPolicy),
    SetFirmware(bool),
    CreateDisk(DiskRole, u64),
    AttachDisk(DiskRole),
    AddAdapter(String),
    EnableIntegration(String),
    Start,
}

#[derive(Default)]
pub(crate) struct FakeHypervisor {
    instances: Mutex<BTreeSet<String>>,
    networks: Vec<NetworkRef>,
    failures: Mutex<HashMap<&'static str, String>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeHypervisor {
    pub(crate) fn new(networks: &[&str], existing: &[&str]) -> Self {
        Self {
            instances: Mutex::new(existing.iter().map(|s| s.to_string()).collect()),
            networks: networks.iter().map(|n| NetworkRef::new(*n)).collect(),
            ..Default::default()
        }
    }

    /// Make the named operation fail with `message`.
    pub(crate) fn fail_on(&self, op: &'static str, message: &str) {
        self.failures.lock().insert(op, message.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn enter(&self, op: &'static str, call: Call) -> ForgeResult<()> {
        if let Some(message) = self.failures.lock().get(op) {
            return Err(ForgeError::Engine(message.clone()));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl HypervisorCapability for FakeHypervisor {
    async fn list_instance_names(&self) -> ForgeResult<BTreeSet<String>> {
        if let Some(message) = self.failures.lock().get("list_instance_names") {
            return Err(ForgeError::Engine(message.clone()));
        }
        Ok(self.instances.lock().clone())
    }

    async fn list_networks(&self) -> ForgeResult<Vec<NetworkRef>> {
        Ok(self.networks.clone())
    }

    async fn create_instance(
        &self,
        name: &str,
        generation: Generation,
        initial_memory_bytes: u64,
        network: &NetworkRef,
    ) -> ForgeResult<InstanceHandle> {
        self.enter(
            "create_instance",
            Call::CreateInstance {
                name: name.to_string(),
                generation,
                memory_bytes: initial_memory_bytes,
                network: network.to_string(),
            },
        )?;
        self.instances.lock().insert(name.to_string());
        Ok(InstanceHandle {
            id: format!("vm-{}", name.to_ascii_lowercase()),
            name: name.to_string(),
        })
    }

    async fn set_processor_count(&self, _handle: &InstanceHandle, count: u32) -> ForgeResult<()> {
        self.enter("set_processor_count", Call::SetProcessor(count))
    }

    async fn set_memory_policy(
        &self,
        _handle: &InstanceHandle,
        policy: &MemoryPolicy,
    ) -> ForgeResult<()> {
        self.enter("set_memory_policy", Call::SetMemory(policy.clone()))
    }

    async fn set_firmware(&self, _handle: &InstanceHandle, secure_boot: bool) -> ForgeResult<()> {
        self.enter("set_firmware", Call::SetFirmware(secure_boot))
    }

    async fn create_disk(
        &self,
        instance_name: &str,
        role: DiskRole,
        size_bytes: u64,
    ) -> ForgeResult<DiskRef> {
        self.enter("create_disk", Call::CreateDisk(role, size_bytes))?;
        Ok(DiskRef {
            path: PathBuf::from(format!("{}-{}.vhdx", instance_name, role.as_str())),
            role,
            size_bytes,
        })
    }

    async fn attach_disk(&self, _handle: &InstanceHandle, disk: &DiskRef) -> ForgeResult<()> {
        self.enter("attach_disk", Call::AttachDisk(disk.role))
    }

    async fn add_network_adapter(
        &self,
        _handle: &InstanceHandle,
        network: &NetworkRef,
    ) -> ForgeResult<()> {
        self.enter("add_network_adapter", Call::AddAdapter(network.to_string()))
    }

    async fn enable_integration_service(
        &self,
        _handle: &InstanceHandle,
        name: &str,
    ) -> ForgeResult<()> {
        self.enter(
            "enable_integration_service",
            Call::EnableIntegration(name.to_string()),
        )
    }

    async fn start_instance(&self, _handle: &InstanceHandle) -> ForgeResult<()> {
        self.enter("start_instance", Call::Start)
    }
}
