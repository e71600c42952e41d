//! Tenant VLAN routing.
//!
//! Every known host address belongs to exactly one tenant VLAN, and every
//! VLAN is owned by exactly one core switch:
//!
//! ```text
//! owner(vlan) = (vlan mod cores_used) + 1
//! cores_used  = min(core_count, vlan_count)
//! ```
//!
//! A core only forwards traffic whose source belongs to a VLAN it owns.
//! The assignment is fixed for the lifetime of the process.

use crate::config::{FabricConfig, TenantConfig};
use crate::error::{ControllerError, ControllerResult};
use crate::protocol::{FlowMatch, FlowTimeout};
use crate::session::SwitchSession;
use crate::topology::ClosTopology;
use clos_types::{DeviceId, MacAddress, PortNo, TenantVlan};
use std::collections::HashMap;
use tracing::debug;

/// Tenant VLAN and owning core of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantAssignment {
    pub vlan: TenantVlan,
    pub owner: DeviceId,
}

/// Static address → VLAN → core mapping.
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    vlans: Vec<TenantVlan>,
    assignments: HashMap<MacAddress, TenantVlan>,
    cores_used: u16,
}

impl TenantRegistry {
    /// Creates a registry for `vlan_count` VLANs spread over at most
    /// `core_count` cores.
    pub fn new(
        vlan_count: u16,
        core_count: u32,
        assignments: impl IntoIterator<Item = (MacAddress, TenantVlan)>,
    ) -> ControllerResult<Self> {
        if vlan_count == 0 || core_count == 0 {
            return Err(ControllerError::config(
                "tenant mode needs at least one VLAN and one core",
            ));
        }

        let vlans = (0..vlan_count)
            .map(TenantVlan::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ControllerError::config(e.to_string()))?;

        let assignments: HashMap<_, _> = assignments.into_iter().collect();
        if let Some((mac, vlan)) = assignments.iter().find(|(_, v)| v.as_u16() >= vlan_count) {
            return Err(ControllerError::config(format!(
                "{} assigned to unknown VLAN {}",
                mac, vlan
            )));
        }

        let cores_used = u16::try_from(core_count).unwrap_or(u16::MAX).min(vlan_count);

        Ok(Self {
            vlans,
            assignments,
            cores_used,
        })
    }

    /// Builds the registry from configuration.
    ///
    /// Without explicit assignments, host `k` of the fabric gets VLAN
    /// `(k - 1) mod vlan_count`, which spreads consecutive hosts round-robin
    /// over the tenants.
    pub fn from_config(tenant: &TenantConfig, fabric: &FabricConfig) -> ControllerResult<Self> {
        if !tenant.assignments.is_empty() {
            return Self::new(
                tenant.vlan_count,
                fabric.core_count,
                tenant.assignments.iter().map(|(&mac, &vlan)| (mac, vlan)),
            );
        }

        let vlan_count = usize::from(tenant.vlan_count.max(1));
        let defaults = ClosTopology::from_config(fabric)
            .hosts()
            .into_iter()
            .enumerate()
            .map(|(i, mac)| {
                // i % vlan_count < vlan_count, which is a u16
                let vlan = TenantVlan::new((i % vlan_count) as u16)
                    .map_err(|e| ControllerError::config(e.to_string()))?;
                Ok((mac, vlan))
            })
            .collect::<ControllerResult<Vec<_>>>()?;

        Self::new(tenant.vlan_count, fabric.core_count, defaults)
    }

    /// Configured VLANs in ascending order.
    pub fn vlans(&self) -> &[TenantVlan] {
        &self.vlans
    }

    /// Number of cores that own at least one VLAN.
    pub fn cores_used(&self) -> u16 {
        self.cores_used
    }

    /// Core switch owning `vlan`.
    pub fn owner_of(&self, vlan: TenantVlan) -> DeviceId {
        DeviceId::new(u64::from(vlan.as_u16() % self.cores_used) + 1)
    }

    /// Looks up the tenant of `mac`.
    pub fn vlan_of(&self, mac: &MacAddress) -> ControllerResult<TenantAssignment> {
        let vlan = *self
            .assignments
            .get(mac)
            .ok_or(ControllerError::UnknownTenant(*mac))?;
        Ok(TenantAssignment {
            vlan,
            owner: self.owner_of(vlan),
        })
    }
}

/// Installs the two permanent rules of a conversation in one go:
/// `(src, dst) → out` and `(dst, src) → reverse`.
///
/// `buffer_id` is attached to the forward rule so a buffered frame is
/// released through it.
pub fn install_bidirectional(
    session: &mut SwitchSession,
    src: MacAddress,
    dst: MacAddress,
    out: PortNo,
    reverse: PortNo,
    buffer_id: Option<u32>,
) -> ControllerResult<()> {
    debug!(
        "Switch {} pins {} <-> {} on ports {} / {}",
        session.device(),
        src,
        dst,
        out,
        reverse
    );
    session.install_flow(
        FlowMatch::pair(src, dst),
        out,
        FlowTimeout::Permanent,
        FlowTimeout::Permanent,
        buffer_id,
    )?;
    session.install_flow(
        FlowMatch::pair(dst, src),
        reverse,
        FlowTimeout::Permanent,
        FlowTimeout::Permanent,
        None,
    )
}
