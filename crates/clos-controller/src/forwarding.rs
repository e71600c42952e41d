//! Role-aware packet-in handling.
//!
//! Each packet-in is decided on four inputs: the session's role, whether
//! the destination is already learned, whether the frame came in on an
//! uplink, and whether tenant isolation is on. Nothing about the decision
//! is kept between packets except the learned-address table.
//!
//! | role | tenant | dst known | from uplink | action |
//! |------|--------|-----------|-------------|--------|
//! | core | off | yes | - | learn, resend, permanent dst-only flow |
//! | core | off | no  | - | learn, flood |
//! | core | on  | yes | - | learn, permanent src<->dst flows; owner only releases the frame |
//! | core | on  | no  | - | learn; owner only floods |
//! | leaf | off | yes | - | learn, resend, short exact flow, forget dst |
//! | leaf | off | no  | no  | learn, flood, copy to least-loaded uplink |
//! | leaf | off | no  | yes | learn, flood |
//! | leaf | on  | yes | yes | permanent src<->dst flows, reply via dst owner's uplink |
//! | leaf | on  | yes | no  | learn, permanent src<->dst flows, resend |
//! | leaf | on  | no  | yes | flood to hosts |
//! | leaf | on  | no  | no  | learn, flood, copy to every uplink |
//!
//! With tenant isolation on, a frame whose source has no tenant is only
//! learned and flooded (leaves also copy it to the least-loaded uplink).
//! No rule is installed for it: a destination-only rule on a core would
//! match every tenant's frames to that host.

use crate::config::{ControllerConfig, ForwardingConfig};
use crate::error::{ControllerError, ControllerResult};
use crate::events::ParsedFrame;
use crate::protocol::{BufferedPacket, FlowMatch, FlowTimeout};
use crate::session::SwitchSession;
use crate::tenant::{install_bidirectional, TenantAssignment, TenantRegistry};
use crate::uplink::select_least_loaded;
use clos_types::{OutputPort, PortNo, SwitchRole};
use tracing::{debug, warn};

/// Per-packet forwarding policy.
#[derive(Debug, Clone)]
pub struct ForwardingEngine {
    tenants: Option<TenantRegistry>,
    leaf_idle: FlowTimeout,
    leaf_hard: FlowTimeout,
}

impl ForwardingEngine {
    pub fn new(tenants: Option<TenantRegistry>, forwarding: &ForwardingConfig) -> Self {
        Self {
            tenants,
            leaf_idle: FlowTimeout::Seconds(forwarding.leaf_idle_timeout_secs),
            leaf_hard: FlowTimeout::Seconds(forwarding.leaf_hard_timeout_secs),
        }
    }

    /// Builds the engine, with a tenant registry if tenant mode is enabled.
    pub fn from_config(config: &ControllerConfig) -> ControllerResult<Self> {
        let tenants = if config.tenant.enabled {
            Some(TenantRegistry::from_config(&config.tenant, &config.fabric)?)
        } else {
            None
        };
        Ok(Self::new(tenants, &config.forwarding))
    }

    pub fn tenants(&self) -> Option<&TenantRegistry> {
        self.tenants.as_ref()
    }

    /// Handles one table miss reported by `session`.
    pub fn handle_packet_in(
        &self,
        session: &mut SwitchSession,
        frame: &ParsedFrame,
        packet: &BufferedPacket,
    ) -> ControllerResult<()> {
        if !frame.parsed {
            warn!(
                "Ignoring incomplete packet on switch {} port {}",
                session.device(),
                packet.in_port
            );
            return Ok(());
        }

        let role = session
            .role()
            .ok_or(ControllerError::NotConnected(session.device()))?;

        let Some(registry) = self.tenants.as_ref() else {
            return match role {
                SwitchRole::Core => core_plain(session, frame, packet),
                SwitchRole::Leaf => self.leaf_plain(session, frame, packet),
            };
        };

        match (role, registry.vlan_of(&frame.src)) {
            (SwitchRole::Core, Ok(assignment)) => core_tenant(session, frame, packet, assignment),
            (SwitchRole::Leaf, Ok(_)) => leaf_tenant(session, frame, packet, registry),
            (_, Err(e)) => {
                debug!("{}, flooding without rules", e);
                flood_untenanted(session, frame, packet)
            }
        }
    }

    fn leaf_plain(
        &self,
        session: &mut SwitchSession,
        frame: &ParsedFrame,
        packet: &BufferedPacket,
    ) -> ControllerResult<()> {
        session.learn(frame.src, packet.in_port);

        if let Some(out) = session.learned_port(&frame.dst) {
            session.resend(packet, OutputPort::Physical(out))?;
            session.install_flow(
                FlowMatch::exact(packet.in_port, frame.src, frame.dst),
                out,
                self.leaf_idle,
                self.leaf_hard,
                None,
            )?;
            // Relearn on the next reply so a short-lived flow never outlives
            // a moved host
            session.forget(&frame.dst);
            return Ok(());
        }

        session.resend(packet, OutputPort::Flood)?;
        copy_to_least_loaded(session, frame, packet)
    }
}

/// Sends a host frame that a leaf flooded locally up one uplink as well.
fn copy_to_least_loaded(
    session: &mut SwitchSession,
    frame: &ParsedFrame,
    packet: &BufferedPacket,
) -> ControllerResult<()> {
    if session.is_core() || session.is_uplink_port(packet.in_port) {
        return Ok(());
    }

    match select_least_loaded(session) {
        Ok(uplink) => {
            debug!(
                "Leaf {} sends {} -> {} up via port {}",
                session.device(),
                frame.src,
                frame.dst,
                uplink
            );
            session.resend(packet, OutputPort::Physical(uplink))
        }
        Err(e @ ControllerError::NoUplinkAvailable(_)) => {
            warn!("{}, frame only flooded locally", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn flood_untenanted(
    session: &mut SwitchSession,
    frame: &ParsedFrame,
    packet: &BufferedPacket,
) -> ControllerResult<()> {
    session.learn(frame.src, packet.in_port);
    session.resend(packet, OutputPort::Flood)?;
    copy_to_least_loaded(session, frame, packet)
}

fn core_plain(
    session: &mut SwitchSession,
    frame: &ParsedFrame,
    packet: &BufferedPacket,
) -> ControllerResult<()> {
    session.learn(frame.src, packet.in_port);

    match session.learned_port(&frame.dst) {
        Some(out) => {
            session.resend(packet, OutputPort::Physical(out))?;
            session.install_flow(
                FlowMatch::destination(frame.dst),
                out,
                FlowTimeout::Permanent,
                FlowTimeout::Permanent,
                None,
            )
        }
        None => session.resend(packet, OutputPort::Flood),
    }
}

fn core_tenant(
    session: &mut SwitchSession,
    frame: &ParsedFrame,
    packet: &BufferedPacket,
    assignment: TenantAssignment,
) -> ControllerResult<()> {
    session.learn(frame.src, packet.in_port);
    let owner = assignment.owner == session.device();

    match session.learned_port(&frame.dst) {
        Some(out) => {
            // The frame is released only by the owning core
            let buffer_id = if owner { packet.buffer_id } else { None };
            install_bidirectional(session, frame.src, frame.dst, out, packet.in_port, buffer_id)?;
            if owner && packet.buffer_id.is_none() {
                session.resend(packet, OutputPort::Physical(out))?;
            }
        }
        None if owner => session.resend(packet, OutputPort::Flood)?,
        None => {}
    }

    if !owner {
        debug!(
            "Core {} does not own VLAN {} of {}, owner is {}",
            session.device(),
            assignment.vlan,
            frame.src,
            assignment.owner
        );
    }
    Ok(())
}

fn leaf_tenant(
    session: &mut SwitchSession,
    frame: &ParsedFrame,
    packet: &BufferedPacket,
    registry: &TenantRegistry,
) -> ControllerResult<()> {
    if session.is_uplink_port(packet.in_port) {
        return match session.learned_port(&frame.dst) {
            Some(out) => {
                let reverse = reply_uplink(session, frame, registry).unwrap_or(packet.in_port);
                install_bidirectional(session, frame.src, frame.dst, out, reverse, packet.buffer_id)?;
                if packet.buffer_id.is_none() {
                    session.resend(packet, OutputPort::Physical(out))?;
                }
                Ok(())
            }
            // Uplinks do not flood, so this reaches local hosts only
            None => session.resend(packet, OutputPort::Flood),
        };
    }

    session.learn(frame.src, packet.in_port);

    if let Some(out) = session.learned_port(&frame.dst) {
        install_bidirectional(session, frame.src, frame.dst, out, packet.in_port, None)?;
        return session.resend(packet, OutputPort::Physical(out));
    }

    session.resend(packet, OutputPort::Flood)?;
    let uplinks: Vec<PortNo> = session.uplinks().values().copied().collect();
    for uplink in uplinks {
        session.resend(packet, OutputPort::Physical(uplink))?;
    }
    Ok(())
}

/// Uplink towards the core owning the destination's VLAN, i.e. where the
/// reply is allowed to travel.
fn reply_uplink(
    session: &SwitchSession,
    frame: &ParsedFrame,
    registry: &TenantRegistry,
) -> Option<PortNo> {
    let assignment = registry.vlan_of(&frame.dst).ok()?;
    session.uplink_to(assignment.owner)
}
