//! Hyper-V control through PowerShell cmdlets.
//!
//! Each capability call renders one script and runs it in a fresh
//! `powershell.exe -NoProfile -NonInteractive` subprocess. Scripts run with
//! `$ErrorActionPreference = 'Stop'`, so a failing cmdlet anywhere in a
//! chain ends the script. A non-zero exit status becomes
//! [`ForgeError::Engine`] carrying the script's stderr.

use super::{DiskRef, ENHANCED_SESSION, HypervisorCapability, InstanceHandle, NetworkRef};
use crate::plan::{DiskRole, MemoryPolicy, mb_to_bytes};
use crate::template::Generation;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use vmforge_shared::errors::{ForgeError, ForgeResult};

/// Quote a value as a single-quoted PowerShell literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn on_off(flag: bool) -> &'static str {
    if flag { "On" } else { "Off" }
}

fn bool_literal(flag: bool) -> &'static str {
    if flag { "$true" } else { "$false" }
}

/// Make every cmdlet error terminating; `-Command` otherwise reports only
/// the status of the last statement.
pub(crate) fn with_stop_on_error(script: &str) -> String {
    format!("$ErrorActionPreference = 'Stop'; {}", script)
}

pub(crate) fn list_instances_script() -> String {
    "Get-VM | Select-Object -ExpandProperty Name".to_string()
}

pub(crate) fn list_networks_script() -> String {
    "Get-VMSwitch | Select-Object -ExpandProperty Name".to_string()
}

pub(crate) fn create_instance_script(
    name: &str,
    generation: Generation,
    initial_memory_bytes: u64,
    network: &NetworkRef,
) -> String {
    format!(
        "New-VM -Name {} -Generation {} -MemoryStartupBytes {} -SwitchName {} -NoVHD \
         | Select-Object -ExpandProperty Id",
        quote(name),
        generation.number(),
        initial_memory_bytes,
        quote(network.as_str()),
    )
}

pub(crate) fn set_processor_script(handle: &InstanceHandle, count: u32) -> String {
    format!("Set-VMProcessor -VMName {} -Count {}", quote(&handle.name), count)
}

pub(crate) fn set_memory_script(handle: &InstanceHandle, policy: &MemoryPolicy) -> String {
    match policy {
        MemoryPolicy::Static { memory_mb } => format!(
            "Set-VMMemory -VMName {} -DynamicMemoryEnabled $false -StartupBytes {}",
            quote(&handle.name),
            mb_to_bytes(*memory_mb),
        ),
        MemoryPolicy::Dynamic {
            startup_mb,
            minimum_mb,
            maximum_mb,
        } => format!(
            "Set-VMMemory -VMName {} -DynamicMemoryEnabled $true -MinimumBytes {} -StartupBytes {} -MaximumBytes {}",
            quote(&handle.name),
            mb_to_bytes(*minimum_mb),
            mb_to_bytes(*startup_mb),
            mb_to_bytes(*maximum_mb),
        ),
    }
}

pub(crate) fn set_firmware_script(handle: &InstanceHandle, secure_boot: bool) -> String {
    format!(
        "Set-VMFirmware -VMName {} -EnableSecureBoot {}",
        quote(&handle.name),
        on_off(secure_boot)
    )
}

pub(crate) fn create_disk_script(path: &Path, size_bytes: u64) -> String {
    let dir = path.parent().unwrap_or(path);
    format!(
        "New-Item -ItemType Directory -Force -Path {} | Out-Null; \
         New-VHD -Path {} -SizeBytes {} -Dynamic | Out-Null",
        quote(&dir.display().to_string()),
        quote(&path.display().to_string()),
        size_bytes,
    )
}

pub(crate) fn attach_disk_script(handle: &InstanceHandle, disk: &DiskRef) -> String {
    format!(
        "Add-VMHardDiskDrive -VMName {} -Path {}",
        quote(&handle.name),
        quote(&disk.path.display().to_string()),
    )
}

pub(crate) fn add_adapter_script(handle: &InstanceHandle, network: &NetworkRef) -> String {
    format!(
        "Add-VMNetworkAdapter -VMName {} -SwitchName {}",
        quote(&handle.name),
        quote(network.as_str()),
    )
}

pub(crate) fn enable_integration_script(handle: &InstanceHandle, name: &str) -> String {
    if name == ENHANCED_SESSION {
        return format!(
            "Set-VMHost -EnableEnhancedSessionMode {}; \
             Set-VM -VMName {} -EnhancedSessionTransportType HvSocket",
            bool_literal(true),
            quote(&handle.name),
        );
    }
    format!(
        "Enable-VMIntegrationService -VMName {} -Name {}",
        quote(&handle.name),
        quote(name),
    )
}

pub(crate) fn start_instance_script(handle: &InstanceHandle) -> String {
    format!("Start-VM -VMName {}", quote(&handle.name))
}

fn disk_file_name(instance_name: &str, role: DiskRole) -> String {
    format!("{}-{}.vhdx", instance_name, role.as_str())
}

/// Hyper-V capability implementation backed by PowerShell.
#[derive(Debug, Clone)]
pub struct PowerShellHypervisor {
    program: PathBuf,
    storage_root: PathBuf,
}

impl PowerShellHypervisor {
    /// Create an adapter storing virtual disks under `storage_root/<instance>/`.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("powershell.exe"),
            storage_root: storage_root.into(),
        }
    }

    /// Use a different PowerShell executable (e.g. `pwsh`).
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub(crate) fn disk_path(&self, instance_name: &str, role: DiskRole) -> PathBuf {
        self.storage_root
            .join(instance_name)
            .join(disk_file_name(instance_name, role))
    }

    async fn run(&self, script: &str) -> ForgeResult<String> {
        tracing::debug!(script = %script, "Running PowerShell");

        let output = Command::new(&self.program)
            .arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-Command")
            .arg(with_stop_on_error(script))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                let err_msg = format!("Failed to launch {}: {}", self.program.display(), e);
                tracing::error!("{}", err_msg);
                ForgeError::Engine(err_msg)
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ForgeError::Engine(format!(
                "command exited with {}: {}",
                output.status, stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn non_empty_lines(output: &str) -> impl Iterator<Item = String> + '_ {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl HypervisorCapability for PowerShellHypervisor {
    async fn list_instance_names(&self) -> ForgeResult<BTreeSet<String>> {
        let output = self.run(&list_instances_script()).await?;
        Ok(non_empty_lines(&output).collect())
    }

    async fn list_networks(&self) -> ForgeResult<Vec<NetworkRef>> {
        let output = self.run(&list_networks_script()).await?;
        Ok(non_empty_lines(&output).map(NetworkRef).collect())
    }

    async fn create_instance(
        &self,
        name: &str,
        generation: Generation,
        initial_memory_bytes: u64,
        network: &NetworkRef,
    ) -> ForgeResult<InstanceHandle> {
        let output = self
            .run(&create_instance_script(
                name,
                generation,
                initial_memory_bytes,
                network,
            ))
            .await?;
        let id = non_empty_lines(&output)
            .next()
            .ok_or_else(|| ForgeError::Engine("New-VM returned no instance id".into()))?;
        Ok(InstanceHandle {
            id,
            name: name.to_string(),
        })
    }

    async fn set_processor_count(&self, handle: &InstanceHandle, count: u32) -> ForgeResult<()> {
        self.run(&set_processor_script(handle, count)).await.map(drop)
    }

    async fn set_memory_policy(
        &self,
        handle: &InstanceHandle,
        policy: &MemoryPolicy,
    ) -> ForgeResult<()> {
        self.run(&set_memory_script(handle, policy)).await.map(drop)
    }

    async fn set_firmware(&self, handle: &InstanceHandle, secure_boot: bool) -> ForgeResult<()> {
        self.run(&set_firmware_script(handle, secure_boot))
            .await
            .map(drop)
    }

    async fn create_disk(
        &self,
        instance_name: &str,
        role: DiskRole,
        size_bytes: u64,
    ) -> ForgeResult<DiskRef> {
        let path = self.disk_path(instance_name, role);
        self.run(&create_disk_script(&path, size_bytes)).await?;
        Ok(DiskRef {
            path,
            role,
            size_bytes,
        })
    }

    async fn attach_disk(&self, handle: &InstanceHandle, disk: &DiskRef) -> ForgeResult<()> {
        self.run(&attach_disk_script(handle, disk)).await.map(drop)
    }

    async fn add_network_adapter(
        &self,
        handle: &InstanceHandle,
        network: &NetworkRef,
    ) -> ForgeResult<()> {
        self.run(&add_adapter_script(handle, network)).await.map(drop)
    }

    async fn enable_integration_service(
        &self,
        handle: &InstanceHandle,
        name: &str,
    ) -> ForgeResult<()> {
        self.run(&enable_integration_script(handle, name))
            .await
            .map(drop)
    }

    async fn start_instance(&self, handle: &InstanceHandle) -> ForgeResult<()> {
        self.run(&start_instance_script(handle)).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> InstanceHandle {
        InstanceHandle {
            id: "5f6c".into(),
            name: "APP01".into(),
        }
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_create_instance_script() {
        let script = create_instance_script(
            "APP01",
            Generation::Gen2,
            8192 * 1024 * 1024,
            &NetworkRef::new("External"),
        );
        assert_eq!(
            script,
            "New-VM -Name 'APP01' -Generation 2 -MemoryStartupBytes 8589934592 \
             -SwitchName 'External' -NoVHD | Select-Object -ExpandProperty Id"
        );
    }

    #[test]
    fn test_dynamic_memory_script() {
        let script = set_memory_script(
            &handle(),
            &MemoryPolicy::Dynamic {
                startup_mb: 4096,
                minimum_mb: 2048,
                maximum_mb: 8192,
            },
        );
        assert!(script.contains("-DynamicMemoryEnabled $true"));
        assert!(script.contains("-MinimumBytes 2147483648"));
        assert!(script.contains("-StartupBytes 4294967296"));
        assert!(script.contains("-MaximumBytes 8589934592"));
    }

    #[test]
    fn test_static_memory_script() {
        let script = set_memory_script(&handle(), &MemoryPolicy::Static { memory_mb: 1024 });
        assert_eq!(
            script,
            "Set-VMMemory -VMName 'APP01' -DynamicMemoryEnabled $false -StartupBytes 1073741824"
        );
    }

    #[test]
    fn test_firmware_script() {
        assert_eq!(
            set_firmware_script(&handle(), false),
            "Set-VMFirmware -VMName 'APP01' -EnableSecureBoot Off"
        );
    }

    #[test]
    fn test_disk_path_layout() {
        let hv = PowerShellHypervisor::new("/vm/disks");
        let path = hv.disk_path("SQL01", DiskRole::Log);
        assert_eq!(path, PathBuf::from("/vm/disks/SQL01/SQL01-log.vhdx"));

        let script = create_disk_script(&path, 1024);
        assert!(script.contains("New-Item -ItemType Directory -Force -Path '/vm/disks/SQL01'"));
        assert!(script.contains("New-VHD -Path '/vm/disks/SQL01/SQL01-log.vhdx' -SizeBytes 1024"));
    }

    #[test]
    fn test_simple_scripts() {
        let h = handle();
        assert_eq!(set_processor_script(&h, 4), "Set-VMProcessor -VMName 'APP01' -Count 4");
        assert_eq!(
            add_adapter_script(&h, &NetworkRef::new("Internal")),
            "Add-VMNetworkAdapter -VMName 'APP01' -SwitchName 'Internal'"
        );
        assert_eq!(start_instance_script(&h), "Start-VM -VMName 'APP01'");
        assert_eq!(
            enable_integration_script(&h, "Guest Service Interface"),
            "Enable-VMIntegrationService -VMName 'APP01' -Name 'Guest Service Interface'"
        );
        assert!(list_instances_script().starts_with("Get-VM"));
        assert!(list_networks_script().starts_with("Get-VMSwitch"));
    }

    #[test]
    fn test_enhanced_session_script() {
        let script = enable_integration_script(&handle(), ENHANCED_SESSION);
        assert_eq!(
            script,
            "Set-VMHost -EnableEnhancedSessionMode $true; \
             Set-VM -VMName 'APP01' -EnhancedSessionTransportType HvSocket"
        );
        assert!(!script.contains("Enable-VMIntegrationService"));
    }

    #[test]
    fn test_scripts_stop_on_first_error() {
        let path = PathBuf::from("/vm/disks/SQL01/SQL01-data.vhdx");
        let script = with_stop_on_error(&create_disk_script(&path, 1024));
        assert!(script.starts_with("$ErrorActionPreference = 'Stop'; New-Item"));
        assert!(script.ends_with("-Dynamic | Out-Null"));

        let script = with_stop_on_error(&enable_integration_script(&handle(), ENHANCED_SESSION));
        assert!(script.starts_with("$ErrorActionPreference = 'Stop'; Set-VMHost"));
    }

    #[test]
    fn test_non_empty_lines() {
        let lines: Vec<String> = non_empty_lines("DC01\r\n\r\n  APP01 \n").collect();
        assert_eq!(lines, vec!["DC01", "APP01"]);
    }

    #[tokio::test]
    async fn test_missing_program_is_engine_error() {
        let hv = PowerShellHypervisor::new("/tmp").with_program("/nonexistent/powershell-binary");
        let result = hv.list_networks().await;
        assert!(matches!(result, Err(ForgeError::Engine(_))));
    }
}
