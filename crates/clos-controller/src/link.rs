//! Link role propagation.
//!
//! Discovery reports each link as a pair of `(device, port)` endpoints. A
//! link between a leaf and a core is an uplink for the leaf: the leaf stops
//! flooding on that port, so floods never bounce back into the spine, and
//! registers the port as its way to that core. Leaf-leaf and core-core
//! links are outside the policy and left alone.

use crate::error::{ControllerError, ControllerResult};
use crate::session::SwitchSession;
use clos_types::{DeviceId, PortNo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// One discovered link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkObservation {
    pub a: DeviceId,
    pub port_a: PortNo,
    pub b: DeviceId,
    pub port_b: PortNo,
}

impl LinkObservation {
    pub fn new(a: DeviceId, port_a: PortNo, b: DeviceId, port_b: PortNo) -> Self {
        Self {
            a,
            port_a,
            b,
            port_b,
        }
    }
}

impl fmt::Display for LinkObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} <-> {}:{}", self.a, self.port_a, self.b, self.port_b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkChange {
    Added,
    Removed,
}

/// Leaf side of a leaf-core link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Uplink {
    leaf: DeviceId,
    port: PortNo,
    core: DeviceId,
}

/// Derives leaf uplinks from link events.
#[derive(Debug, Clone, Default)]
pub struct LinkRolePropagator {
    evict_on_link_down: bool,
}

impl LinkRolePropagator {
    pub fn new(evict_on_link_down: bool) -> Self {
        Self { evict_on_link_down }
    }

    /// Applies a link event to the sessions it touches.
    ///
    /// Returns true if a leaf's uplink registry changed. Fails with
    /// [`ControllerError::UnknownDevice`] if either endpoint has no session.
    pub fn on_link(
        &self,
        sessions: &mut BTreeMap<DeviceId, SwitchSession>,
        link: &LinkObservation,
        change: LinkChange,
    ) -> ControllerResult<bool> {
        let Some(uplink) = classify(sessions, link)? else {
            debug!("Ignoring link {}: not a leaf-core link", link);
            return Ok(false);
        };

        let leaf = sessions
            .get_mut(&uplink.leaf)
            .ok_or(ControllerError::UnknownDevice(uplink.leaf))?;

        match change {
            LinkChange::Added => {
                leaf.add_uplink(uplink.core, uplink.port);
                info!(
                    "Leaf {} port {} is an uplink to core {}, disabling flood",
                    uplink.leaf, uplink.port, uplink.core
                );
                if let Err(e) = leaf.set_flooding(uplink.port, false) {
                    debug!("Flood state not pushed to {}: {}", uplink.leaf, e);
                }
                Ok(true)
            }
            LinkChange::Removed if self.evict_on_link_down => {
                if leaf.uplink_to(uplink.core) != Some(uplink.port) {
                    return Ok(false);
                }
                leaf.remove_uplink(uplink.core);
                info!(
                    "Leaf {} lost uplink to core {} on port {}, re-enabling flood",
                    uplink.leaf, uplink.core, uplink.port
                );
                if let Err(e) = leaf.set_flooding(uplink.port, true) {
                    debug!("Flood state not pushed to {}: {}", uplink.leaf, e);
                }
                Ok(true)
            }
            LinkChange::Removed => {
                debug!("Link {} removed, uplink registry kept", link);
                Ok(false)
            }
        }
    }
}

/// Finds the leaf endpoint of a link with exactly one core end.
fn classify(
    sessions: &BTreeMap<DeviceId, SwitchSession>,
    link: &LinkObservation,
) -> ControllerResult<Option<Uplink>> {
    let a = sessions
        .get(&link.a)
        .ok_or(ControllerError::UnknownDevice(link.a))?;
    let b = sessions
        .get(&link.b)
        .ok_or(ControllerError::UnknownDevice(link.b))?;

    let uplink = match (a.is_core(), b.is_core()) {
        (true, false) if b.is_leaf() => Some(Uplink {
            leaf: link.b,
            port: link.port_b,
            core: link.a,
        }),
        (false, true) if a.is_leaf() => Some(Uplink {
            leaf: link.a,
            port: link.port_a,
            core: link.b,
        }),
        _ => None,
    };
    Ok(uplink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChannelConnection, OutboundCommand, SwitchCommand};
    use crate::topology::ClosTopology;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    struct Fabric {
        sessions: BTreeMap<DeviceId, SwitchSession>,
        rx: mpsc::UnboundedReceiver<OutboundCommand>,
    }

    impl Fabric {
        /// Cores 1-2, leaves 3-5, all connected.
        fn new() -> Self {
            let topo = ClosTopology::new(2, 3, 3);
            let (tx, rx) = mpsc::unbounded_channel();
            let mut sessions = BTreeMap::new();
            for id in 1..=5 {
                let device = DeviceId::new(id);
                let mut session = SwitchSession::new(device);
                session
                    .connect(Box::new(ChannelConnection::new(device, tx.clone())), &topo)
                    .unwrap();
                sessions.insert(device, session);
            }
            Self { sessions, rx }
        }

        fn commands(&mut self) -> Vec<OutboundCommand> {
            std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
        }
    }

    fn link(a: u64, pa: u16, b: u64, pb: u16) -> LinkObservation {
        LinkObservation::new(DeviceId::new(a), PortNo::new(pa), DeviceId::new(b), PortNo::new(pb))
    }

    #[test]
    fn test_leaf_core_link_registers_uplink() {
        let mut fabric = Fabric::new();
        let propagator = LinkRolePropagator::default();

        // Reported core-first and leaf-first: both orientations work
        assert!(propagator
            .on_link(&mut fabric.sessions, &link(1, 1, 3, 4), LinkChange::Added)
            .unwrap());
        assert!(propagator
            .on_link(&mut fabric.sessions, &link(3, 5, 2, 1), LinkChange::Added)
            .unwrap());

        let leaf = &fabric.sessions[&DeviceId::new(3)];
        assert_eq!(leaf.uplink_to(DeviceId::new(1)), Some(PortNo::new(4)));
        assert_eq!(leaf.uplink_to(DeviceId::new(2)), Some(PortNo::new(5)));
        assert!(fabric.sessions[&DeviceId::new(1)].uplinks().is_empty());

        let commands = fabric.commands();
        assert_eq!(
            commands,
            vec![
                OutboundCommand {
                    device: DeviceId::new(3),
                    command: SwitchCommand::PortMod {
                        port: PortNo::new(4),
                        flood: false
                    },
                },
                OutboundCommand {
                    device: DeviceId::new(3),
                    command: SwitchCommand::PortMod {
                        port: PortNo::new(5),
                        flood: false
                    },
                },
            ]
        );
    }

    #[test]
    fn test_other_links_ignored() {
        let mut fabric = Fabric::new();
        let propagator = LinkRolePropagator::default();

        assert!(!propagator
            .on_link(&mut fabric.sessions, &link(1, 2, 2, 2), LinkChange::Added)
            .unwrap());
        assert!(!propagator
            .on_link(&mut fabric.sessions, &link(3, 6, 4, 6), LinkChange::Added)
            .unwrap());
        assert!(fabric.commands().is_empty());
    }

    #[test]
    fn test_unknown_endpoint() {
        let mut fabric = Fabric::new();
        let err = LinkRolePropagator::default()
            .on_link(&mut fabric.sessions, &link(1, 1, 9, 1), LinkChange::Added)
            .unwrap_err();
        assert!(matches!(err, ControllerError::UnknownDevice(d) if d == DeviceId::new(9)));
    }

    #[test]
    fn test_link_down_keeps_uplink_by_default() {
        let mut fabric = Fabric::new();
        let propagator = LinkRolePropagator::default();
        propagator
            .on_link(&mut fabric.sessions, &link(1, 1, 3, 4), LinkChange::Added)
            .unwrap();
        fabric.commands();

        assert!(!propagator
            .on_link(&mut fabric.sessions, &link(1, 1, 3, 4), LinkChange::Removed)
            .unwrap());
        assert_eq!(
            fabric.sessions[&DeviceId::new(3)].uplink_to(DeviceId::new(1)),
            Some(PortNo::new(4))
        );
        assert!(fabric.commands().is_empty());
    }

    #[test]
    fn test_link_down_evicts_when_enabled() {
        let mut fabric = Fabric::new();
        let propagator = LinkRolePropagator::new(true);
        propagator
            .on_link(&mut fabric.sessions, &link(1, 1, 3, 4), LinkChange::Added)
            .unwrap();
        fabric.commands();

        assert!(propagator
            .on_link(&mut fabric.sessions, &link(3, 4, 1, 1), LinkChange::Removed)
            .unwrap());
        assert_eq!(fabric.sessions[&DeviceId::new(3)].uplink_to(DeviceId::new(1)), None);
        assert_eq!(
            fabric.commands()[0].command,
            SwitchCommand::PortMod {
                port: PortNo::new(4),
                flood: true
            }
        );
    }

    #[test]
    fn test_uplink_registered_on_disconnected_leaf() {
        let mut fabric = Fabric::new();
        fabric
            .sessions
            .get_mut(&DeviceId::new(4))
            .unwrap()
            .disconnect();

        assert!(LinkRolePropagator::default()
            .on_link(&mut fabric.sessions, &link(2, 2, 4, 5), LinkChange::Added)
            .unwrap());
        assert_eq!(
            fabric.sessions[&DeviceId::new(4)].uplink_to(DeviceId::new(2)),
            Some(PortNo::new(5))
        );
    }
}
