//! Configuration file support for closd
//!
//! Loads and validates the controller configuration from a TOML file.
//! Default location: /etc/closd/closd.toml
//!
//! Every value is a process-lifetime constant; nothing here is re-read
//! once the controller is running.

use crate::error::{ControllerError, ControllerResult};
use clos_types::{MacAddress, TenantVlan};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/closd/closd.toml";

/// Upper bound on emulated hosts; the tenant registry holds one entry per host
pub const MAX_FABRIC_HOSTS: u32 = 1 << 16;

/// Shape of the emulated leaf-spine fabric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Number of core (spine) switches
    #[serde(default = "default_core_count")]
    pub core_count: u32,

    /// Number of leaf (edge) switches
    #[serde(default = "default_leaf_count")]
    pub leaf_count: u32,

    /// Hosts attached to each leaf
    #[serde(default = "default_hosts_per_leaf")]
    pub hosts_per_leaf: u32,

    /// Bandwidth of every link in Mbit/s
    #[serde(default = "default_link_bandwidth")]
    pub link_bandwidth_mbps: u32,
}

/// Telemetry sampling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Port statistics polling period in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

/// Flow lifetimes used by the forwarding engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingConfig {
    /// Idle timeout of short-lived leaf flows in seconds
    #[serde(default = "default_leaf_idle_timeout")]
    pub leaf_idle_timeout_secs: u16,

    /// Hard timeout of short-lived leaf flows in seconds
    #[serde(default = "default_leaf_hard_timeout")]
    pub leaf_hard_timeout_secs: u16,
}

/// Tenant isolation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Pin each tenant's traffic to one core switch
    #[serde(default)]
    pub enabled: bool,

    /// Number of tenant VLANs
    #[serde(default = "default_vlan_count")]
    pub vlan_count: u16,

    /// Explicit address → VLAN assignments. When empty, host `k` of the
    /// fabric is assigned VLAN `(k - 1) mod vlan_count`.
    #[serde(default)]
    pub assignments: BTreeMap<MacAddress, TenantVlan>,
}

/// Link handling options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Forget an uplink and re-enable flooding when its link goes away
    #[serde(default)]
    pub evict_uplinks_on_link_down: bool,
}

/// Complete closd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Fabric shape
    #[serde(default)]
    pub fabric: FabricConfig,

    /// Telemetry sampling
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Flow lifetimes
    #[serde(default)]
    pub forwarding: ForwardingConfig,

    /// Tenant isolation
    #[serde(default)]
    pub tenant: TenantConfig,

    /// Link handling
    #[serde(default)]
    pub links: LinkConfig,
}

// Default functions
fn default_core_count() -> u32 {
    2
}

fn default_leaf_count() -> u32 {
    3
}

fn default_hosts_per_leaf() -> u32 {
    3
}

fn default_link_bandwidth() -> u32 {
    10
}

fn default_interval_secs() -> u64 {
    3
}

fn default_leaf_idle_timeout() -> u16 {
    3
}

fn default_leaf_hard_timeout() -> u16 {
    10
}

fn default_vlan_count() -> u16 {
    4
}

// Default implementations
impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            core_count: default_core_count(),
            leaf_count: default_leaf_count(),
            hosts_per_leaf: default_hosts_per_leaf(),
            link_bandwidth_mbps: default_link_bandwidth(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            leaf_idle_timeout_secs: default_leaf_idle_timeout(),
            leaf_hard_timeout_secs: default_leaf_hard_timeout(),
        }
    }
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vlan_count: default_vlan_count(),
            assignments: BTreeMap::new(),
        }
    }
}

impl FabricConfig {
    /// Total number of emulated hosts
    pub fn host_count(&self) -> u32 {
        self.leaf_count.saturating_mul(self.hosts_per_leaf)
    }
}

impl ControllerConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> ControllerResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| {
                ControllerError::config(format!("Failed to parse config file {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ControllerError::Io(e)),
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> ControllerResult<Self> {
        toml::from_str(content).map_err(|e| ControllerError::config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> ControllerResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ControllerError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path.as_ref(), content)?;

        Ok(())
    }

    /// Get telemetry polling period as Duration
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry.interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> ControllerResult<()> {
        let fabric = &self.fabric;
        if fabric.core_count == 0 || fabric.leaf_count == 0 || fabric.hosts_per_leaf == 0 {
            return Err(ControllerError::config(
                "core_count, leaf_count and hosts_per_leaf must be > 0",
            ));
        }

        // Leaf ports carry hosts then one uplink per core, core ports one per leaf
        let leaf_ports = fabric.hosts_per_leaf.checked_add(fabric.core_count);
        let max_port = u32::from(u16::MAX);
        if leaf_ports.is_none_or(|n| n > max_port) || fabric.leaf_count > max_port {
            return Err(ControllerError::config(format!(
                "fabric too large: ports are numbered up to {}",
                u16::MAX
            )));
        }

        match fabric.leaf_count.checked_mul(fabric.hosts_per_leaf) {
            Some(hosts) if hosts <= MAX_FABRIC_HOSTS => {}
            _ => {
                return Err(ControllerError::config(format!(
                    "fabric too large: {} leaves x {} hosts exceeds {} hosts",
                    fabric.leaf_count, fabric.hosts_per_leaf, MAX_FABRIC_HOSTS
                )));
            }
        }

        if fabric.link_bandwidth_mbps == 0 {
            return Err(ControllerError::config("link_bandwidth_mbps must be > 0"));
        }

        if self.telemetry.interval_secs == 0 {
            return Err(ControllerError::config("telemetry interval_secs must be > 0"));
        }

        let forwarding = &self.forwarding;
        if forwarding.leaf_hard_timeout_secs < forwarding.leaf_idle_timeout_secs {
            return Err(ControllerError::config(
                "leaf_hard_timeout_secs must be >= leaf_idle_timeout_secs",
            ));
        }

        let tenant = &self.tenant;
        if tenant.vlan_count == 0 || tenant.vlan_count > TenantVlan::MAX + 1 {
            return Err(ControllerError::config("vlan_count must be 1-4095"));
        }

        if let Some((mac, vlan)) = tenant
            .assignments
            .iter()
            .find(|(_, vlan)| vlan.as_u16() >= tenant.vlan_count)
        {
            return Err(ControllerError::config(format!(
                "{} assigned to VLAN {} but only {} VLANs are configured",
                mac, vlan, tenant.vlan_count
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.fabric.core_count, 2);
        assert_eq!(config.fabric.leaf_count, 3);
        assert_eq!(config.fabric.hosts_per_leaf, 3);
        assert_eq!(config.fabric.host_count(), 9);
        assert_eq!(config.telemetry_interval(), Duration::from_secs(3));
        assert_eq!(config.forwarding.leaf_idle_timeout_secs, 3);
        assert_eq!(config.forwarding.leaf_hard_timeout_secs, 10);
        assert!(!config.tenant.enabled);
        assert!(!config.links.evict_uplinks_on_link_down);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_fabric_rejected() {
        let mut config = ControllerConfig::default();
        config.fabric.leaf_count = 70_000;
        config.fabric.hosts_per_leaf = 70_000;
        assert_eq!(config.fabric.host_count(), u32::MAX);
        assert!(config.validate().is_err());

        // Fits the port numbering but not the host bound
        config.fabric.leaf_count = 1_000;
        config.fabric.hosts_per_leaf = 1_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("hosts"));

        config.fabric.leaf_count = 256;
        config.fabric.hosts_per_leaf = 256;
        assert!(config.validate().is_ok());

        config.fabric.hosts_per_leaf = u32::MAX;
        config.fabric.leaf_count = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ControllerConfig::from_toml(
            r#"
            [fabric]
            core_count = 4

            [tenant]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.fabric.core_count, 4);
        assert_eq!(config.fabric.leaf_count, 3);
        assert!(config.tenant.enabled);
        assert_eq!(config.tenant.vlan_count, 4);
    }

    #[test]
    fn test_tenant_assignments() {
        let config = ControllerConfig::from_toml(
            r#"
            [tenant]
            enabled = true
            vlan_count = 2

            [tenant.assignments]
            "00:00:00:00:00:01" = 1
            "00:00:00:00:00:02" = 0
            "#,
        )
        .unwrap();

        let mac = MacAddress::from_host_index(1);
        assert_eq!(config.tenant.assignments.get(&mac).map(|v| v.as_u16()), Some(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ControllerConfig::default();
        config.fabric.core_count = 0;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.telemetry.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.forwarding.leaf_hard_timeout_secs = 1;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.tenant.vlan_count = 2;
        config
            .tenant
            .assignments
            .insert(MacAddress::from_host_index(1), TenantVlan::new(3).unwrap());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closd.toml");

        let mut config = ControllerConfig::default();
        config.fabric.leaf_count = 5;
        config.tenant.enabled = true;
        config.save(&path).unwrap();

        let loaded = ControllerConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closd.toml");
        fs::write(&path, "[fabric\ncore_count = ").unwrap();

        let err = ControllerConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, ControllerError::Config(_)));
    }
}
