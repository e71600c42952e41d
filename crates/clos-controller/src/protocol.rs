//! Commands the controller emits towards switches.
//!
//! The wire encoding is owned by an external protocol stack; this module
//! only models what the controller asks for. All sends are fire-and-forget.

use clos_types::{DeviceId, MacAddress, OutputPort, PortNo};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

/// A frame the switch buffered and handed to the controller on a table miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedPacket {
    /// Buffer holding the frame on the switch, if the switch buffered it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_id: Option<u32>,
    /// Port the frame arrived on
    pub in_port: PortNo,
    /// Raw frame bytes, carried back verbatim on resend
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
}

/// Rule expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowTimeout {
    /// Never expires.
    Permanent,
    /// Expires after the given number of seconds.
    Seconds(u16),
}

impl FlowTimeout {
    /// Returns true for [`FlowTimeout::Permanent`].
    pub fn is_permanent(&self) -> bool {
        matches!(self, FlowTimeout::Permanent)
    }
}

/// Match part of a flow rule. `None` fields are wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FlowMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_port: Option<PortNo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dl_src: Option<MacAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dl_dst: Option<MacAddress>,
}

impl FlowMatch {
    /// Exact match on the packet as it arrived: ingress port and address pair.
    pub fn exact(in_port: PortNo, src: MacAddress, dst: MacAddress) -> Self {
        Self {
            in_port: Some(in_port),
            dl_src: Some(src),
            dl_dst: Some(dst),
        }
    }

    /// Match on a source/destination address pair from any port.
    pub fn pair(src: MacAddress, dst: MacAddress) -> Self {
        Self {
            in_port: None,
            dl_src: Some(src),
            dl_dst: Some(dst),
        }
    }

    /// Match every frame towards `dst`.
    pub fn destination(dst: MacAddress) -> Self {
        Self {
            in_port: None,
            dl_src: None,
            dl_dst: Some(dst),
        }
    }

    /// Returns true if a frame with these headers would hit this rule.
    pub fn matches(&self, in_port: PortNo, src: MacAddress, dst: MacAddress) -> bool {
        self.in_port.is_none_or(|p| p == in_port)
            && self.dl_src.is_none_or(|m| m == src)
            && self.dl_dst.is_none_or(|m| m == dst)
    }
}

/// A single instruction for one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwitchCommand {
    /// Emit a buffered frame out of a port.
    PacketOut {
        packet: BufferedPacket,
        out: OutputPort,
    },
    /// Install or replace a flow rule.
    FlowMod {
        matching: FlowMatch,
        out: PortNo,
        idle: FlowTimeout,
        hard: FlowTimeout,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        buffer_id: Option<u32>,
    },
    /// Toggle flooding on a port.
    PortMod { port: PortNo, flood: bool },
    /// Poll per-port byte counters.
    PortStatsRequest,
}

impl SwitchCommand {
    /// Permanent rule with no buffered frame attached.
    pub fn permanent_flow(matching: FlowMatch, out: PortNo) -> Self {
        SwitchCommand::FlowMod {
            matching,
            out,
            idle: FlowTimeout::Permanent,
            hard: FlowTimeout::Permanent,
            buffer_id: None,
        }
    }
}

/// A command addressed to a device, as it leaves the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCommand {
    pub device: DeviceId,
    pub command: SwitchCommand,
}

/// Live control channel to one switch.
///
/// A session owns its connection exclusively while the switch is up and
/// drops it on disconnect.
pub trait SwitchConnection: fmt::Debug {
    /// Sends a command. Delivery is the protocol stack's concern.
    fn send(&mut self, command: SwitchCommand);

    /// Releases the connection.
    fn close(&mut self) {}
}

/// Connection that forwards commands over an in-process channel.
#[derive(Debug)]
pub struct ChannelConnection {
    device: DeviceId,
    tx: mpsc::UnboundedSender<OutboundCommand>,
}

impl ChannelConnection {
    /// Creates a connection for `device` feeding `tx`.
    pub fn new(device: DeviceId, tx: mpsc::UnboundedSender<OutboundCommand>) -> Self {
        Self { device, tx }
    }
}

impl SwitchConnection for ChannelConnection {
    fn send(&mut self, command: SwitchCommand) {
        let outbound = OutboundCommand {
            device: self.device,
            command,
        };
        if self.tx.send(outbound).is_err() {
            debug!("Command channel for switch {} closed, dropping command", self.device);
        }
    }
}

/// Opens connection handles for switches that came up.
pub trait Connector: fmt::Debug {
    fn open(&mut self, device: DeviceId) -> Box<dyn SwitchConnection>;
}

/// Hands out [`ChannelConnection`]s that all feed one command stream.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    tx: mpsc::UnboundedSender<OutboundCommand>,
}

impl ChannelConnector {
    pub fn new(tx: mpsc::UnboundedSender<OutboundCommand>) -> Self {
        Self { tx }
    }
}

impl Connector for ChannelConnector {
    fn open(&mut self, device: DeviceId) -> Box<dyn SwitchConnection> {
        Box::new(ChannelConnection::new(device, self.tx.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mac(n: u32) -> MacAddress {
        MacAddress::from_host_index(n)
    }

    #[test]
    fn test_exact_match() {
        let m = FlowMatch::exact(PortNo::new(1), mac(1), mac(2));
        assert!(m.matches(PortNo::new(1), mac(1), mac(2)));
        assert!(!m.matches(PortNo::new(2), mac(1), mac(2)));
        assert!(!m.matches(PortNo::new(1), mac(2), mac(1)));
    }

    #[test]
    fn test_destination_match_wildcards() {
        let m = FlowMatch::destination(mac(5));
        assert!(m.matches(PortNo::new(7), mac(1), mac(5)));
        assert!(m.matches(PortNo::new(1), mac(3), mac(5)));
        assert!(!m.matches(PortNo::new(1), mac(5), mac(3)));
    }

    #[test]
    fn test_command_json_shape() {
        let cmd = SwitchCommand::PortMod {
            port: PortNo::new(4),
            flood: false,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json, serde_json::json!({"type": "port_mod", "port": 4, "flood": false}));

        let flow = SwitchCommand::permanent_flow(FlowMatch::destination(mac(2)), PortNo::new(3));
        let json = serde_json::to_value(&flow).unwrap();
        assert_eq!(json["matching"], serde_json::json!({"dl_dst": "00:00:00:00:00:02"}));
        assert_eq!(json["idle"], serde_json::json!("permanent"));
    }

    #[test]
    fn test_channel_connection_tags_device() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = ChannelConnection::new(DeviceId::new(3), tx);
        conn.send(SwitchCommand::PortStatsRequest);

        let out = rx.try_recv().unwrap();
        assert_eq!(out.device, DeviceId::new(3));
        assert_eq!(out.command, SwitchCommand::PortStatsRequest);
    }

    #[test]
    fn test_connector_shares_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = ChannelConnector::new(tx);
        connector.open(DeviceId::new(1)).send(SwitchCommand::PortStatsRequest);
        connector.open(DeviceId::new(4)).send(SwitchCommand::PortStatsRequest);

        assert_eq!(rx.try_recv().unwrap().device, DeviceId::new(1));
        assert_eq!(rx.try_recv().unwrap().device, DeviceId::new(4));
    }

    #[test]
    fn test_channel_connection_survives_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut conn = ChannelConnection::new(DeviceId::new(1), tx);
        conn.send(SwitchCommand::PortStatsRequest);
    }
}
