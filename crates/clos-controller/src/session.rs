//! Per-switch session state.
//!
//! A [`SwitchSession`] is created the first time a switch connects and is
//! reused across every reconnect. It keeps the switch's role, its live
//! connection, the learned address table, the uplink registry and the
//! telemetry samples. All mutation goes through its methods.

use crate::error::{ControllerError, ControllerResult};
use crate::protocol::{BufferedPacket, FlowMatch, FlowTimeout, SwitchCommand, SwitchConnection};
use crate::telemetry::PortTelemetry;
use crate::topology::TopologyOracle;
use clos_types::{DeviceId, MacAddress, OutputPort, PortNo, SwitchRole};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// State the controller keeps for one switch.
#[derive(Debug)]
pub struct SwitchSession {
    device: DeviceId,
    /// Fixed by the first connection
    role: Option<SwitchRole>,
    connection: Option<Box<dyn SwitchConnection>>,
    /// Hardware address → ingress port
    learned: HashMap<MacAddress, PortNo>,
    /// Adjacent core → local port; only populated on leaves
    uplinks: BTreeMap<DeviceId, PortNo>,
    telemetry: BTreeMap<PortNo, PortTelemetry>,
}

impl SwitchSession {
    /// Creates an empty, disconnected session.
    pub fn new(device: DeviceId) -> Self {
        Self {
            device,
            role: None,
            connection: None,
            learned: HashMap::new(),
            uplinks: BTreeMap::new(),
            telemetry: BTreeMap::new(),
        }
    }

    /// Attaches a new connection.
    ///
    /// The role is taken from the topology on the first connection. On
    /// later connections the topology must report the same role, otherwise
    /// [`ControllerError::RoleConflict`] is returned and the session is left
    /// untouched. Any previous connection is torn down first.
    ///
    /// Flooding is disabled again on every registered uplink, since links
    /// may have been observed while the switch was away.
    pub fn connect(
        &mut self,
        connection: Box<dyn SwitchConnection>,
        topology: &dyn TopologyOracle,
    ) -> ControllerResult<SwitchRole> {
        let reported = SwitchRole::from_is_core(topology.is_core_switch(self.device));
        let role = match self.role {
            Some(assigned) if assigned != reported => {
                return Err(ControllerError::RoleConflict {
                    device: self.device,
                    assigned,
                    reported,
                });
            }
            Some(assigned) => assigned,
            None => {
                self.role = Some(reported);
                reported
            }
        };

        self.disconnect();
        self.connection = Some(connection);
        info!("Switch {} connected as {}", self.device, role);

        let uplinks: Vec<PortNo> = self.uplinks.values().copied().collect();
        for port in uplinks {
            self.set_flooding(port, false)?;
        }
        Ok(role)
    }

    /// Releases the connection and drops connection-scoped caches.
    ///
    /// The uplink registry survives: it is derived from links, not from
    /// the connection.
    pub fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            debug!("Disconnect {:?}", connection);
            connection.close();
            self.telemetry.clear();
            self.learned.clear();
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn role(&self) -> Option<SwitchRole> {
        self.role
    }

    pub fn is_core(&self) -> bool {
        self.role == Some(SwitchRole::Core)
    }

    pub fn is_leaf(&self) -> bool {
        self.role == Some(SwitchRole::Leaf)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Sends a raw command over the live connection.
    pub fn send(&mut self, command: SwitchCommand) -> ControllerResult<()> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(ControllerError::NotConnected(self.device))?;
        connection.send(command);
        Ok(())
    }

    /// Instructs the switch to emit a buffered frame out of `out`.
    pub fn resend(&mut self, packet: &BufferedPacket, out: OutputPort) -> ControllerResult<()> {
        self.send(SwitchCommand::PacketOut {
            packet: packet.clone(),
            out,
        })
    }

    /// Installs or replaces a flow rule.
    pub fn install_flow(
        &mut self,
        matching: FlowMatch,
        out: PortNo,
        idle: FlowTimeout,
        hard: FlowTimeout,
        buffer_id: Option<u32>,
    ) -> ControllerResult<()> {
        debug!(
            "Installing flow on {}: {:?} -> port {} (idle {:?}, hard {:?})",
            self.device, matching, out, idle, hard
        );
        self.send(SwitchCommand::FlowMod {
            matching,
            out,
            idle,
            hard,
            buffer_id,
        })
    }

    /// Enables or disables flooding on a port.
    pub fn set_flooding(&mut self, port: PortNo, flood: bool) -> ControllerResult<()> {
        self.send(SwitchCommand::PortMod { port, flood })
    }

    /// Records that `mac` was seen on `port`, overwriting any older entry.
    pub fn learn(&mut self, mac: MacAddress, port: PortNo) {
        self.learned.insert(mac, port);
    }

    pub fn learned_port(&self, mac: &MacAddress) -> Option<PortNo> {
        self.learned.get(mac).copied()
    }

    /// Drops the learned entry for `mac`, forcing it to be relearned.
    pub fn forget(&mut self, mac: &MacAddress) -> Option<PortNo> {
        self.learned.remove(mac)
    }

    pub fn learned_len(&self) -> usize {
        self.learned.len()
    }

    /// Registers `port` as the uplink towards `core`.
    pub fn add_uplink(&mut self, core: DeviceId, port: PortNo) {
        debug!("Leaf {} learns uplink to core {} on port {}", self.device, core, port);
        self.uplinks.insert(core, port);
    }

    /// Forgets the uplink towards `core` and its telemetry.
    pub fn remove_uplink(&mut self, core: DeviceId) -> Option<PortNo> {
        let port = self.uplinks.remove(&core)?;
        self.telemetry.remove(&port);
        Some(port)
    }

    pub fn uplink_to(&self, core: DeviceId) -> Option<PortNo> {
        self.uplinks.get(&core).copied()
    }

    /// Uplink registry in ascending core id order.
    pub fn uplinks(&self) -> &BTreeMap<DeviceId, PortNo> {
        &self.uplinks
    }

    pub fn is_uplink_port(&self, port: PortNo) -> bool {
        self.uplinks.values().any(|&p| p == port)
    }

    pub fn telemetry(&self, port: PortNo) -> Option<&PortTelemetry> {
        self.telemetry.get(&port)
    }

    /// Stores the latest sample for a port.
    pub fn record_sample(&mut self, port: PortNo, sample: PortTelemetry) {
        self.telemetry.insert(port, sample);
    }
}
