//! Topology role oracle.
//!
//! The controller never builds the topology itself; it only asks whether a
//! switch is a core switch. [`ClosTopology`] answers for the numbering used
//! by the emulated fabric.

use crate::config::FabricConfig;
use clos_types::{DeviceId, MacAddress};

/// Answers role questions about fabric switches.
pub trait TopologyOracle {
    /// Returns true if `device` is a core (spine) switch.
    fn is_core_switch(&self, device: DeviceId) -> bool;

    /// Enumerates core switches in ascending id order.
    fn core_switches(&self) -> Vec<DeviceId>;
}

/// Two-tier Clos fabric with sequential numbering.
///
/// Core switches take datapath ids `1..=core_count`, leaves follow them.
/// Hosts are numbered from 1 across leaves in order and use
/// [`MacAddress::from_host_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosTopology {
    core_count: u32,
    leaf_count: u32,
    hosts_per_leaf: u32,
}

impl ClosTopology {
    pub fn new(core_count: u32, leaf_count: u32, hosts_per_leaf: u32) -> Self {
        Self {
            core_count,
            leaf_count,
            hosts_per_leaf,
        }
    }

    pub fn from_config(fabric: &FabricConfig) -> Self {
        Self::new(fabric.core_count, fabric.leaf_count, fabric.hosts_per_leaf)
    }

    pub fn leaf_switches(&self) -> Vec<DeviceId> {
        let first = u64::from(self.core_count) + 1;
        (first..first + u64::from(self.leaf_count))
            .map(DeviceId::new)
            .collect()
    }

    /// Addresses of the hosts attached to `leaf`, in port order.
    pub fn hosts_of(&self, leaf: DeviceId) -> Vec<MacAddress> {
        let first_leaf = u64::from(self.core_count) + 1;
        let Some(offset) = leaf.as_u64().checked_sub(first_leaf) else {
            return Vec::new();
        };
        if offset >= u64::from(self.leaf_count) {
            return Vec::new();
        }
        // offset < leaf_count, so it fits
        let base = offset as u32 * self.hosts_per_leaf;
        (1..=self.hosts_per_leaf)
            .map(|k| MacAddress::from_host_index(base + k))
            .collect()
    }

    /// Every host address in the fabric.
    pub fn hosts(&self) -> Vec<MacAddress> {
        (1..=self.leaf_count.saturating_mul(self.hosts_per_leaf))
            .map(MacAddress::from_host_index)
            .collect()
    }
}

impl TopologyOracle for ClosTopology {
    fn is_core_switch(&self, device: DeviceId) -> bool {
        (1..=u64::from(self.core_count)).contains(&device.as_u64())
    }

    fn core_switches(&self) -> Vec<DeviceId> {
        (1..=u64::from(self.core_count)).map(DeviceId::new).collect()
    }
}
