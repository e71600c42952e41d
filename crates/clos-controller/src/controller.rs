//! Fabric controller: owns every switch session and routes events to them.

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::events::{FabricEvent, ParsedFrame};
use crate::forwarding::ForwardingEngine;
use crate::link::{LinkChange, LinkObservation, LinkRolePropagator};
use crate::protocol::{BufferedPacket, Connector, SwitchConnection};
use crate::session::SwitchSession;
use crate::telemetry::{PortStats, TelemetrySampler};
use crate::topology::TopologyOracle;
use clos_types::{DeviceId, SwitchRole};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Top-level event dispatcher.
///
/// Sessions are created on the first connection of a device and are never
/// removed. All events are handled one at a time on the caller's task.
pub struct FabricController {
    sessions: BTreeMap<DeviceId, SwitchSession>,
    topology: Box<dyn TopologyOracle>,
    connector: Box<dyn Connector>,
    links: LinkRolePropagator,
    sampler: TelemetrySampler,
    engine: ForwardingEngine,
}

impl fmt::Debug for FabricController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FabricController")
            .field("sessions", &self.sessions.len())
            .field("connector", &self.connector)
            .field("links", &self.links)
            .field("sampler", &self.sampler)
            .finish_non_exhaustive()
    }
}

impl FabricController {
    pub fn new(
        config: &ControllerConfig,
        topology: Box<dyn TopologyOracle>,
        connector: Box<dyn Connector>,
    ) -> ControllerResult<Self> {
        config.validate()?;
        let engine = ForwardingEngine::from_config(config)?;
        if let Some(tenants) = engine.tenants() {
            info!(
                "Tenant isolation enabled: {} VLANs over {} cores",
                tenants.vlans().len(),
                tenants.cores_used()
            );
        }

        Ok(Self {
            sessions: BTreeMap::new(),
            topology,
            connector,
            links: LinkRolePropagator::new(config.links.evict_uplinks_on_link_down),
            sampler: TelemetrySampler::new(config.telemetry_interval()),
            engine,
        })
    }

    /// Telemetry polling period.
    pub fn telemetry_interval(&self) -> Duration {
        self.sampler.interval()
    }

    pub fn session(&self, device: DeviceId) -> Option<&SwitchSession> {
        self.sessions.get(&device)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SwitchSession> {
        self.sessions.values()
    }

    /// Handles one event.
    ///
    /// Recoverable errors are logged and swallowed; only a fatal error is
    /// returned, after which the controller must not be used further.
    #[instrument(skip_all, fields(event = event.kind()))]
    pub fn dispatch(&mut self, event: FabricEvent) -> ControllerResult<()> {
        let result = match event {
            FabricEvent::ConnectionUp { device } => {
                let connection = self.connector.open(device);
                self.connection_up(device, connection).map(|_| ())
            }
            FabricEvent::ConnectionDown { device } => self.connection_down(device),
            FabricEvent::PacketIn {
                device,
                frame,
                packet,
            } => self.packet_in(device, &frame, &packet),
            FabricEvent::LinkEvent { link, change } => self.link_event(&link, change),
            FabricEvent::PortStatus {
                device,
                port,
                reason,
            } => {
                info!("Port {} on switch {} has been {}", port, device, reason);
                Ok(())
            }
            FabricEvent::PortStatsReceived { device, stats } => self.port_stats(device, &stats),
            FabricEvent::TelemetryTick => {
                self.telemetry_tick();
                Ok(())
            }
        };

        match result {
            Err(e) if e.is_fatal() => {
                error!("{}", e);
                Err(e)
            }
            Err(e) => {
                debug!("Event dropped: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Attaches a connection to the device's session, creating the session
    /// on first contact.
    pub fn connection_up(
        &mut self,
        device: DeviceId,
        connection: Box<dyn SwitchConnection>,
    ) -> ControllerResult<SwitchRole> {
        let session = self
            .sessions
            .entry(device)
            .or_insert_with(|| SwitchSession::new(device));
        session.connect(connection, self.topology.as_ref())
    }

    pub fn connection_down(&mut self, device: DeviceId) -> ControllerResult<()> {
        let session = self.session_mut(device)?;
        session.disconnect();
        info!("Switch {} down", device);
        Ok(())
    }

    pub fn packet_in(
        &mut self,
        device: DeviceId,
        frame: &ParsedFrame,
        packet: &BufferedPacket,
    ) -> ControllerResult<()> {
        let session = self
            .sessions
            .get_mut(&device)
            .ok_or(ControllerError::UnknownDevice(device))?;
        if !session.is_connected() {
            return Err(ControllerError::NotConnected(device));
        }
        self.engine.handle_packet_in(session, frame, packet)
    }

    pub fn link_event(&mut self, link: &LinkObservation, change: LinkChange) -> ControllerResult<()> {
        self.links.on_link(&mut self.sessions, link, change).map(|_| ())
    }

    pub fn port_stats(&mut self, device: DeviceId, stats: &[PortStats]) -> ControllerResult<()> {
        let session = self
            .sessions
            .get_mut(&device)
            .ok_or(ControllerError::UnknownDevice(device))?;
        if !session.is_connected() {
            return Err(ControllerError::NotConnected(device));
        }
        self.sampler.record(session, stats);
        Ok(())
    }

    /// Polls every connected leaf for port counters.
    pub fn telemetry_tick(&mut self) -> usize {
        self.sampler.poll(self.sessions.values_mut())
    }

    fn session_mut(&mut self, device: DeviceId) -> ControllerResult<&mut SwitchSession> {
        self.sessions
            .get_mut(&device)
            .ok_or(ControllerError::UnknownDevice(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PortStatusReason;
    use crate::protocol::{ChannelConnector, OutboundCommand, SwitchCommand};
    use crate::telemetry::PortTelemetry;
    use crate::topology::ClosTopology;
    use clos_types::{MacAddress, OutputPort, PortNo};
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    fn controller(
        config: &ControllerConfig,
    ) -> (FabricController, mpsc::UnboundedReceiver<OutboundCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = FabricController::new(
            config,
            Box::new(ClosTopology::from_config(&config.fabric)),
            Box::new(ChannelConnector::new(tx)),
        )
        .unwrap();
        (controller, rx)
    }

    fn up(controller: &mut FabricController, ids: impl IntoIterator<Item = u64>) {
        for id in ids {
            controller
                .dispatch(FabricEvent::ConnectionUp {
                    device: DeviceId::new(id),
                })
                .unwrap();
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundCommand>) -> Vec<OutboundCommand> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn link_up(a: u64, pa: u16, b: u64, pb: u16) -> FabricEvent {
        FabricEvent::LinkEvent {
            link: LinkObservation::new(DeviceId::new(a), PortNo::new(pa), DeviceId::new(b), PortNo::new(pb)),
            change: LinkChange::Added,
        }
    }

    #[test]
    fn test_connection_up_assigns_roles() {
        let (mut ctl, _rx) = controller(&ControllerConfig::default());
        up(&mut ctl, 1..=5);

        assert_eq!(ctl.sessions().count(), 5);
        assert!(ctl.session(DeviceId::new(2)).unwrap().is_core());
        assert!(ctl.session(DeviceId::new(3)).unwrap().is_leaf());
    }

    #[test]
    fn test_sessions_survive_reconnect() {
        let (mut ctl, _rx) = controller(&ControllerConfig::default());
        up(&mut ctl, [1, 3]);
        ctl.dispatch(link_up(1, 1, 3, 4)).unwrap();

        ctl.dispatch(FabricEvent::ConnectionDown {
            device: DeviceId::new(3),
        })
        .unwrap();
        assert!(!ctl.session(DeviceId::new(3)).unwrap().is_connected());

        up(&mut ctl, [3]);
        let leaf = ctl.session(DeviceId::new(3)).unwrap();
        assert!(leaf.is_connected());
        assert_eq!(leaf.uplink_to(DeviceId::new(1)), Some(PortNo::new(4)));
        assert_eq!(ctl.sessions().count(), 2);
    }

    #[test]
    fn test_unknown_devices_are_ignored() {
        let (mut ctl, mut rx) = controller(&ControllerConfig::default());
        up(&mut ctl, [1]);

        ctl.dispatch(link_up(1, 1, 3, 4)).unwrap();
        ctl.dispatch(FabricEvent::ConnectionDown {
            device: DeviceId::new(9),
        })
        .unwrap();
        ctl.dispatch(FabricEvent::PortStatus {
            device: DeviceId::new(9),
            port: PortNo::new(1),
            reason: PortStatusReason::Added,
        })
        .unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_packet_in_for_disconnected_switch_ignored() {
        let (mut ctl, mut rx) = controller(&ControllerConfig::default());
        up(&mut ctl, [1]);
        ctl.dispatch(FabricEvent::ConnectionDown {
            device: DeviceId::new(1),
        })
        .unwrap();

        ctl.dispatch(FabricEvent::PacketIn {
            device: DeviceId::new(1),
            frame: ParsedFrame::new(MacAddress::from_host_index(1), MacAddress::from_host_index(2)),
            packet: BufferedPacket {
                buffer_id: None,
                in_port: PortNo::new(1),
                data: Vec::new(),
            },
        })
        .unwrap();
        assert_eq!(ctl.session(DeviceId::new(1)).unwrap().learned_len(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_role_conflict_is_fatal() {
        /// Flips the answer after the first query.
        #[derive(Debug, Default)]
        struct FlakyOracle(std::sync::atomic::AtomicBool);

        impl TopologyOracle for FlakyOracle {
            fn is_core_switch(&self, _device: DeviceId) -> bool {
                self.0.fetch_xor(true, std::sync::atomic::Ordering::Relaxed)
            }

            fn core_switches(&self) -> Vec<DeviceId> {
                Vec::new()
            }
        }

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut ctl = FabricController::new(
            &ControllerConfig::default(),
            Box::new(FlakyOracle::default()),
            Box::new(ChannelConnector::new(tx)),
        )
        .unwrap();

        up(&mut ctl, [1]);
        let err = ctl
            .dispatch(FabricEvent::ConnectionUp {
                device: DeviceId::new(1),
            })
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_link_seen_while_leaf_down_applied_on_reconnect() {
        let (mut ctl, mut rx) = controller(&ControllerConfig::default());
        up(&mut ctl, [1, 3]);
        ctl.dispatch(FabricEvent::ConnectionDown {
            device: DeviceId::new(3),
        })
        .unwrap();
        ctl.dispatch(link_up(3, 4, 1, 3)).unwrap();
        assert!(drain(&mut rx).is_empty());

        up(&mut ctl, [3]);
        assert_eq!(
            drain(&mut rx),
            vec![OutboundCommand {
                device: DeviceId::new(3),
                command: SwitchCommand::PortMod {
                    port: PortNo::new(4),
                    flood: false,
                },
            }]
        );
    }

    #[test]
    fn test_telemetry_cycle() {
        let (mut ctl, mut rx) = controller(&ControllerConfig::default());
        up(&mut ctl, 1..=3);
        ctl.dispatch(link_up(1, 1, 3, 4)).unwrap();
        ctl.dispatch(link_up(2, 1, 3, 5)).unwrap();
        drain(&mut rx);

        ctl.dispatch(FabricEvent::TelemetryTick).unwrap();
        let polled = drain(&mut rx);
        assert_eq!(
            polled,
            vec![OutboundCommand {
                device: DeviceId::new(3),
                command: SwitchCommand::PortStatsRequest,
            }]
        );

        for total in [1000, 1300] {
            ctl.dispatch(FabricEvent::PortStatsReceived {
                device: DeviceId::new(3),
                stats: vec![PortStats {
                    port: PortNo::new(4),
                    rx_bytes: total,
                    tx_bytes: 0,
                }],
            })
            .unwrap();
        }

        let leaf = ctl.session(DeviceId::new(3)).unwrap();
        assert_eq!(leaf.telemetry(PortNo::new(4)), Some(&PortTelemetry::new(1300, 100)));
    }

    #[test]
    fn test_packet_in_reaches_engine() {
        let (mut ctl, mut rx) = controller(&ControllerConfig::default());
        up(&mut ctl, [1, 3]);
        ctl.dispatch(link_up(1, 1, 3, 4)).unwrap();
        drain(&mut rx);

        let packet = BufferedPacket {
            buffer_id: None,
            in_port: PortNo::new(1),
            data: vec![1, 2, 3],
        };
        ctl.dispatch(FabricEvent::PacketIn {
            device: DeviceId::new(3),
            frame: ParsedFrame::new(MacAddress::from_host_index(1), MacAddress::from_host_index(4)),
            packet: packet.clone(),
        })
        .unwrap();

        let outs: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|c| match c.command {
                SwitchCommand::PacketOut { out, .. } => out,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(outs, vec![OutputPort::Flood, OutputPort::Physical(PortNo::new(4))]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ControllerConfig::default();
        config.telemetry.interval_secs = 0;
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = FabricController::new(
            &config,
            Box::new(ClosTopology::from_config(&config.fabric)),
            Box::new(ChannelConnector::new(tx)),
        );
        assert!(matches!(result, Err(ControllerError::Config(_))));
    }
}
