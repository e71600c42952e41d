//! Test fixtures for fabric scenarios
//!
//! Port numbering follows the emulated fabric:
//! - leaf `i` (1-based): hosts on ports `1..=hosts_per_leaf`, the uplink to
//!   core `c` on port `hosts_per_leaf + c`
//! - core `c`: the link to leaf `i` on port `i`

use clos_controller::{
    ClosTopology, ControllerConfig, FabricConfig, FabricEvent, LinkChange, LinkObservation,
    ParsedFrame, TopologyOracle,
};
use clos_types::{DeviceId, MacAddress, PortNo, TenantVlan};

/// Shape and wiring of a two-tier fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FabricLayout {
    pub core_count: u32,
    pub leaf_count: u32,
    pub hosts_per_leaf: u32,
}

impl FabricLayout {
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

    /// Core `index` (1-based).
    pub fn core(&self, index: u32) -> DeviceId {
        DeviceId::new(u64::from(index))
    }

    /// Leaf `index` (1-based).
    pub fn leaf(&self, index: u32) -> DeviceId {
        DeviceId::new(u64::from(self.core_count + index))
    }

    /// Role oracle with the same numbering.
    pub fn topology(&self) -> ClosTopology {
        ClosTopology::new(self.core_count, self.leaf_count, self.hosts_per_leaf)
    }

    pub fn cores(&self) -> Vec<DeviceId> {
        self.topology().core_switches()
    }

    pub fn leaves(&self) -> Vec<DeviceId> {
        self.topology().leaf_switches()
    }

    pub fn switches(&self) -> Vec<DeviceId> {
        let mut all = self.cores();
        all.extend(self.leaves());
        all
    }

    pub fn host_count(&self) -> u32 {
        self.leaf_count * self.hosts_per_leaf
    }

    /// Address of host `k` (1-based).
    pub fn host_mac(&self, k: u32) -> MacAddress {
        MacAddress::from_host_index(k)
    }

    /// Leaf host `k` hangs off.
    pub fn host_leaf(&self, k: u32) -> DeviceId {
        self.leaf((k - 1) / self.hosts_per_leaf + 1)
    }

    /// Leaf port host `k` is plugged into.
    pub fn host_port(&self, k: u32) -> PortNo {
        port((k - 1) % self.hosts_per_leaf + 1)
    }

    /// Leaf port towards core `core_index`.
    pub fn uplink_port(&self, core_index: u32) -> PortNo {
        port(self.hosts_per_leaf + core_index)
    }

    /// Core port towards leaf `leaf_index`.
    pub fn core_port(&self, leaf_index: u32) -> PortNo {
        port(leaf_index)
    }

    /// Ports present on `device`.
    pub fn ports_of(&self, device: DeviceId) -> Vec<PortNo> {
        let count = if device.as_u64() <= u64::from(self.core_count) {
            self.leaf_count
        } else {
            self.hosts_per_leaf + self.core_count
        };
        (1..=count).map(port).collect()
    }

    /// Every leaf-core link, leaf side first.
    pub fn links(&self) -> Vec<LinkObservation> {
        let mut links = Vec::new();
        for leaf_index in 1..=self.leaf_count {
            for core_index in 1..=self.core_count {
                links.push(LinkObservation::new(
                    self.leaf(leaf_index),
                    self.uplink_port(core_index),
                    self.core(core_index),
                    self.core_port(leaf_index),
                ));
            }
        }
        links
    }

    /// Link between leaf `leaf_index` and core `core_index`.
    pub fn link(&self, leaf_index: u32, core_index: u32) -> LinkObservation {
        LinkObservation::new(
            self.leaf(leaf_index),
            self.uplink_port(core_index),
            self.core(core_index),
            self.core_port(leaf_index),
        )
    }

    /// Connection-up events for every switch, cores first.
    pub fn connection_events(&self) -> Vec<FabricEvent> {
        self.switches()
            .into_iter()
            .map(|device| FabricEvent::ConnectionUp { device })
            .collect()
    }

    /// Link-up events for every leaf-core link.
    pub fn link_events(&self) -> Vec<FabricEvent> {
        self.links()
            .into_iter()
            .map(|link| FabricEvent::LinkEvent {
                link,
                change: LinkChange::Added,
            })
            .collect()
    }
}

fn port(n: u32) -> PortNo {
    PortNo::new(u16::try_from(n).unwrap_or(u16::MAX))
}

/// 2 cores, 3 leaves, 3 hosts per leaf.
pub fn small_fabric() -> ControllerConfig {
    fabric_config(2, 3, 3)
}

/// Default configuration with the given fabric shape.
pub fn fabric_config(core_count: u32, leaf_count: u32, hosts_per_leaf: u32) -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.fabric.core_count = core_count;
    config.fabric.leaf_count = leaf_count;
    config.fabric.hosts_per_leaf = hosts_per_leaf;
    config
}

/// Small fabric with tenant isolation over `vlan_count` VLANs and the
/// default round-robin assignment.
pub fn tenant_fabric(vlan_count: u16) -> ControllerConfig {
    let mut config = small_fabric();
    config.tenant.enabled = true;
    config.tenant.vlan_count = vlan_count;
    config
}

/// Adds an explicit tenant assignment for host `k`.
pub fn with_assignment(mut config: ControllerConfig, k: u32, vlan: TenantVlan) -> ControllerConfig {
    config
        .tenant
        .assignments
        .insert(MacAddress::from_host_index(k), vlan);
    config
}

/// Frame from host `src` to host `dst`.
pub fn host_frame(src: u32, dst: u32) -> ParsedFrame {
    ParsedFrame::new(MacAddress::from_host_index(src), MacAddress::from_host_index(dst))
}

/// Ethernet header bytes for a frame: destination then source.
pub fn encode_frame(frame: &ParsedFrame) -> Vec<u8> {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(frame.dst.as_bytes());
    data.extend_from_slice(frame.src.as_bytes());
    data
}

/// Reverses [`encode_frame`]. Returns `None` for short buffers.
pub fn decode_frame(data: &[u8]) -> Option<ParsedFrame> {
    let dst: [u8; 6] = data.get(0..6)?.try_into().ok()?;
    let src: [u8; 6] = data.get(6..12)?.try_into().ok()?;
    Some(ParsedFrame::new(MacAddress::from(src), MacAddress::from(dst)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_layout_numbering() {
        let layout = FabricLayout::new(2, 3, 3);
        assert_eq!(layout.leaves(), vec![DeviceId::new(3), DeviceId::new(4), DeviceId::new(5)]);
        assert_eq!(layout.host_leaf(1), DeviceId::new(3));
        assert_eq!(layout.host_leaf(4), DeviceId::new(4));
        assert_eq!(layout.host_port(6), PortNo::new(3));
        assert_eq!(layout.uplink_port(2), PortNo::new(5));
        assert_eq!(layout.ports_of(DeviceId::new(1)).len(), 3);
        assert_eq!(layout.ports_of(DeviceId::new(5)).len(), 5);
        assert_eq!(layout.links().len(), 6);
    }

    #[test]
    fn test_frame_encoding() {
        let frame = host_frame(1, 4);
        let data = encode_frame(&frame);
        assert_eq!(data.len(), 12);
        assert_eq!(decode_frame(&data), Some(frame));
        assert_eq!(decode_frame(&data[..8]), None);
    }
}
