//! Host configuration surface used by the deployment workflow.
//!
//! Everything that touches the physical host (adapters, computer name,
//! Windows features, domain membership, firewall) goes through
//! [`HostCapability`]. Domain-join credentials are obtained by the
//! implementation at call time and never appear in [`HostDeployment`], so
//! they are never written to the stage record.

use crate::plan::MAX_INSTANCE_NAME_LEN;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;
use vmforge_shared::errors::{ForgeError, ForgeResult};

/// Static IPv4 configuration for one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Adapter alias as shown by the host (e.g. "Ethernet").
    pub adapter: String,
    pub address: Ipv4Addr,
    pub prefix_length: u8,
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub dns_servers: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainJoin {
    pub domain: String,
    #[serde(default)]
    pub organizational_unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingSettings {
    pub file_and_printer: bool,
    pub network_discovery: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallSettings {
    pub enabled: bool,
    pub allow_remote_desktop: bool,
    pub allow_icmp: bool,
}

impl Default for FirewallSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_remote_desktop: true,
            allow_icmp: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub disable_smb1: bool,
    pub require_nla: bool,
    pub enable_defender: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            disable_smb1: true,
            require_nla: true,
            enable_defender: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopSettings {
    pub remote_desktop: bool,
    pub show_file_extensions: bool,
    pub disable_server_manager_at_logon: bool,
}

/// Everything a host deployment configures.
///
/// Saved as the stage record snapshot before every restart so a resumed run
/// continues with the same configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDeployment {
    pub hostname: String,
    /// `None` leaves addressing untouched (DHCP).
    #[serde(default)]
    pub network: Option<NetworkSettings>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub domain: Option<DomainJoin>,
    #[serde(default)]
    pub sharing: SharingSettings,
    #[serde(default)]
    pub firewall: FirewallSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub desktop: DesktopSettings,
}

impl HostDeployment {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            network: None,
            roles: Vec::new(),
            domain: None,
            sharing: SharingSettings::default(),
            firewall: FirewallSettings::default(),
            security: SecuritySettings::default(),
            desktop: DesktopSettings::default(),
        }
    }

    /// Load a deployment description from a JSON file.
    pub fn from_file(path: &Path) -> ForgeResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ForgeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let deployment: Self = serde_json::from_str(&contents).map_err(|e| {
            ForgeError::Config(format!("Invalid deployment file {}: {}", path.display(), e))
        })?;
        deployment.validate()?;
        Ok(deployment)
    }

    pub fn validate(&self) -> ForgeResult<()> {
        let hostname = self.hostname.trim();
        if hostname.is_empty() {
            return Err(ForgeError::validation("hostname", "must not be empty"));
        }
        if hostname.len() > MAX_INSTANCE_NAME_LEN {
            return Err(ForgeError::validation(
                "hostname",
                format!("must be at most {} characters", MAX_INSTANCE_NAME_LEN),
            ));
        }
        if !hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ForgeError::validation(
                "hostname",
                "may only contain letters, digits and '-'",
            ));
        }

        if let Some(network) = &self.network {
            if network.adapter.trim().is_empty() {
                return Err(ForgeError::validation("network.adapter", "must not be empty"));
            }
            if network.prefix_length == 0 || network.prefix_length > 32 {
                return Err(ForgeError::validation(
                    "network.prefix_length",
                    "must be between 1 and 32",
                ));
            }
        }

        let mut seen = BTreeSet::new();
        for role in &self.roles {
            if role.trim().is_empty() {
                return Err(ForgeError::validation("roles", "role names must not be empty"));
            }
            if !seen.insert(role.to_ascii_lowercase()) {
                return Err(ForgeError::validation(
                    "roles",
                    format!("'{}' is listed more than once", role),
                ));
            }
        }

        if let Some(domain) = &self.domain
            && domain.domain.trim().is_empty()
        {
            return Err(ForgeError::validation("domain", "must not be empty"));
        }

        Ok(())
    }
}

/// Host management operations the deployment workflow depends on.
#[async_trait]
pub trait HostCapability: Send + Sync {
    async fn configure_network(&self, settings: &NetworkSettings) -> ForgeResult<()>;

    /// Takes effect after the next restart.
    async fn rename_host(&self, hostname: &str) -> ForgeResult<()>;

    async fn install_roles(&self, roles: &[String]) -> ForgeResult<()>;

    /// The implementation prompts for or otherwise resolves credentials.
    async fn join_domain(&self, domain: &DomainJoin) -> ForgeResult<()>;

    async fn enable_sharing(&self, settings: &SharingSettings) -> ForgeResult<()>;

    async fn configure_firewall(&self, settings: &FirewallSettings) -> ForgeResult<()>;

    async fn apply_security(&self, settings: &SecuritySettings) -> ForgeResult<()>;

    async fn configure_desktop(&self, settings: &DesktopSettings) -> ForgeResult<()>;

    /// Request a host restart. The current process is expected to end soon after.
    async fn restart(&self) -> ForgeResult<()>;
}

/// Asks the operator whether to restart now.
pub trait RestartPrompt: Send + Sync {
    fn confirm_restart(&self, completed_stage: &str, next_stage: u32) -> bool;
}

/// Restart without asking.
pub struct AutoRestart;

impl RestartPrompt for AutoRestart {
    fn confirm_restart(&self, _completed_stage: &str, _next_stage: u32) -> bool {
        true
    }
}

/// Never restart; the operator restarts by hand and relaunches.
pub struct ManualRestart;

impl RestartPrompt for ManualRestart {
    fn confirm_restart(&self, _completed_stage: &str, _next_stage: u32) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment() -> HostDeployment {
        let mut deployment = HostDeployment::new("SRV01");
        deployment.network = Some(NetworkSettings {
            adapter: "Ethernet".into(),
            address: Ipv4Addr::new(10, 0, 0, 10),
            prefix_length: 24,
            gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
            dns_servers: vec![Ipv4Addr::new(10, 0, 0, 2)],
        });
        deployment.roles = vec!["Hyper-V".into(), "File-Services".into()];
        deployment.domain = Some(DomainJoin {
            domain: "corp.example".into(),
            organizational_unit: None,
        });
        deployment
    }

    #[test]
    fn test_valid_deployment() {
        deployment().validate().unwrap();
    }

    #[test]
    fn test_hostname_rules() {
        let mut d = deployment();
        d.hostname = "   ".into();
        assert_eq!(d.validate().unwrap_err().field(), Some("hostname"));

        d.hostname = "THIS-NAME-IS-TOO-LONG".into();
        assert_eq!(d.validate().unwrap_err().field(), Some("hostname"));

        d.hostname = "SRV_01".into();
        assert_eq!(d.validate().unwrap_err().field(), Some("hostname"));
    }

    #[test]
    fn test_prefix_length_range() {
        let mut d = deployment();
        if let Some(network) = d.network.as_mut() {
            network.prefix_length = 33;
        }
        assert_eq!(
            d.validate().unwrap_err().field(),
            Some("network.prefix_length")
        );
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let mut d = deployment();
        d.roles.push("hyper-v".into());
        assert_eq!(d.validate().unwrap_err().field(), Some("roles"));
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("host.json");
        std::fs::write(&path, r#"{"hostname": "SRV02"}"#).unwrap();

        let d = HostDeployment::from_file(&path).unwrap();
        assert_eq!(d, HostDeployment::new("SRV02"));
        assert!(d.firewall.enabled);
        assert!(!d.sharing.file_and_printer);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("host.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            HostDeployment::from_file(&path),
            Err(ForgeError::Config(_))
        ));
    }
}
