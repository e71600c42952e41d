//! Events delivered to the controller by the protocol and discovery stack.

use crate::link::{LinkChange, LinkObservation};
use crate::protocol::BufferedPacket;
use crate::telemetry::PortStats;
use clos_types::{DeviceId, MacAddress, PortNo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ethernet header fields extracted from a packet-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFrame {
    pub src: MacAddress,
    pub dst: MacAddress,
    /// False when the frame was truncated or could not be decoded
    #[serde(default = "default_parsed")]
    pub parsed: bool,
}

fn default_parsed() -> bool {
    true
}

impl ParsedFrame {
    pub fn new(src: MacAddress, dst: MacAddress) -> Self {
        Self {
            src,
            dst,
            parsed: true,
        }
    }

    /// A frame the parser gave up on.
    pub fn malformed(src: MacAddress, dst: MacAddress) -> Self {
        Self {
            src,
            dst,
            parsed: false,
        }
    }
}

/// Why a port status message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortStatusReason {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for PortStatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStatusReason::Added => write!(f, "added"),
            PortStatusReason::Removed => write!(f, "removed"),
            PortStatusReason::Modified => write!(f, "modified"),
        }
    }
}

/// Every input the controller reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FabricEvent {
    /// A switch opened its control channel.
    ConnectionUp { device: DeviceId },
    /// A switch closed its control channel.
    ConnectionDown { device: DeviceId },
    /// A frame missed the switch's flow table.
    PacketIn {
        device: DeviceId,
        frame: ParsedFrame,
        packet: BufferedPacket,
    },
    /// Discovery saw a link appear or disappear.
    LinkEvent {
        #[serde(flatten)]
        link: LinkObservation,
        change: LinkChange,
    },
    /// A port was added, removed or modified on a switch.
    PortStatus {
        device: DeviceId,
        port: PortNo,
        reason: PortStatusReason,
    },
    /// Reply to a port statistics request.
    PortStatsReceived {
        device: DeviceId,
        stats: Vec<PortStats>,
    },
    /// Telemetry period elapsed.
    TelemetryTick,
}

impl FabricEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FabricEvent::ConnectionUp { .. } => "connection_up",
            FabricEvent::ConnectionDown { .. } => "connection_down",
            FabricEvent::PacketIn { .. } => "packet_in",
            FabricEvent::LinkEvent { .. } => "link_event",
            FabricEvent::PortStatus { .. } => "port_status",
            FabricEvent::PortStatsReceived { .. } => "port_stats_received",
            FabricEvent::TelemetryTick => "telemetry_tick",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_packet_in_from_json() {
        let event: FabricEvent = serde_json::from_str(
            r#"{
                "event": "packet_in",
                "device": 3,
                "frame": {"src": "00:00:00:00:00:01", "dst": "00:00:00:00:00:02"},
                "packet": {"buffer_id": 17, "in_port": 1}
            }"#,
        )
        .unwrap();

        assert_eq!(
            event,
            FabricEvent::PacketIn {
                device: DeviceId::new(3),
                frame: ParsedFrame::new(
                    MacAddress::from_host_index(1),
                    MacAddress::from_host_index(2)
                ),
                packet: BufferedPacket {
                    buffer_id: Some(17),
                    in_port: PortNo::new(1),
                    data: Vec::new(),
                },
            }
        );
        assert_eq!(event.kind(), "packet_in");
    }

    #[test]
    fn test_link_event_is_flat() {
        let event: FabricEvent = serde_json::from_str(
            r#"{"event": "link_event", "a": 3, "port_a": 4, "b": 1, "port_b": 1, "change": "added"}"#,
        )
        .unwrap();

        let FabricEvent::LinkEvent { link, change } = event else {
            panic!("expected link event");
        };
        assert_eq!(link.a, DeviceId::new(3));
        assert_eq!(link.port_b, PortNo::new(1));
        assert_eq!(change, LinkChange::Added);
    }

    #[test]
    fn test_tick_and_status_json() {
        let tick: FabricEvent = serde_json::from_str(r#"{"event": "telemetry_tick"}"#).unwrap();
        assert_eq!(tick, FabricEvent::TelemetryTick);

        let status = FabricEvent::PortStatus {
            device: DeviceId::new(2),
            port: PortNo::new(3),
            reason: PortStatusReason::Modified,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["reason"], serde_json::json!("modified"));
        assert_eq!(json["event"], serde_json::json!("port_status"));
    }

    #[test]
    fn test_malformed_flag() {
        let frame: ParsedFrame = serde_json::from_str(
            r#"{"src": "00:00:00:00:00:01", "dst": "ff:ff:ff:ff:ff:ff", "parsed": false}"#,
        )
        .unwrap();
        assert!(!frame.parsed);
        assert!(frame.dst.is_broadcast());
    }
}
