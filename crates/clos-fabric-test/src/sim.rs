//! Simulated flow-table dataplane.
//!
//! Each simulated switch has a flow table, a set of no-flood ports and
//! per-port byte counters. Frames are walked hop by hop: a flow hit
//! forwards in the "hardware", a miss becomes a packet-in to a real
//! [`FabricController`], and the commands it emits are applied back to the
//! switches before the walk continues.

use crate::fixtures::{decode_frame, encode_frame, FabricLayout};
use clos_controller::{
    BufferedPacket, ChannelConnector, ClosTopology, ControllerConfig, ControllerError,
    FabricController, FabricEvent, FlowMatch, FlowTimeout, LinkChange, OutboundCommand,
    ParsedFrame, PortStats, SwitchCommand,
};
use clos_types::{DeviceId, MacAddress, OutputPort, PortNo};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Upper bound on hops for one injected frame.
const MAX_HOPS: usize = 4096;

/// Bytes accounted per frame on every port it crosses.
const FRAME_BYTES: u64 = 100;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Host {0} is not part of the fabric")]
    UnknownHost(u32),

    #[error("Frame {src} -> {dst} still in flight after {hops} hops")]
    ForwardingLoop {
        src: MacAddress,
        dst: MacAddress,
        hops: usize,
    },
}

pub type SimResult<T> = Result<T, SimError>;

/// A flow rule as installed on a simulated switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimFlow {
    pub matching: FlowMatch,
    pub out: PortNo,
    pub idle: FlowTimeout,
    pub hard: FlowTimeout,
}

impl SimFlow {
    pub fn is_permanent(&self) -> bool {
        self.idle.is_permanent() && self.hard.is_permanent()
    }
}

/// What happened to one injected frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficReport {
    /// Packet-ins raised while the frame was in flight
    pub packet_ins: Vec<DeviceId>,
    /// Hosts the frame (or copies of it) reached
    pub delivered_to: Vec<MacAddress>,
}

impl TrafficReport {
    /// True if the frame crossed the fabric without involving the controller.
    pub fn switched_in_hardware(&self) -> bool {
        self.packet_ins.is_empty()
    }

    pub fn delivered(&self, host: MacAddress) -> bool {
        self.delivered_to.contains(&host)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Host(MacAddress),
    Switch(DeviceId, PortNo),
}

#[derive(Debug, Default)]
struct Counters {
    rx_bytes: u64,
    tx_bytes: u64,
}

#[derive(Debug, Default)]
struct SimSwitch {
    ports: Vec<PortNo>,
    no_flood: BTreeSet<PortNo>,
    flows: Vec<SimFlow>,
    buffers: HashMap<u32, (PortNo, ParsedFrame)>,
    counters: BTreeMap<PortNo, Counters>,
}

impl SimSwitch {
    fn lookup(&self, in_port: PortNo, frame: &ParsedFrame) -> Option<PortNo> {
        self.flows
            .iter()
            .find(|f| f.matching.matches(in_port, frame.src, frame.dst))
            .map(|f| f.out)
    }

    /// Installs a rule, replacing one with the same match.
    fn install(&mut self, flow: SimFlow) {
        match self.flows.iter_mut().find(|f| f.matching == flow.matching) {
            Some(existing) => *existing = flow,
            None => self.flows.push(flow),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Hop {
    device: DeviceId,
    in_port: PortNo,
    frame: ParsedFrame,
}

/// Leaf-spine fabric wired to a live controller.
#[derive(Debug)]
pub struct SimFabric {
    layout: FabricLayout,
    controller: FabricController,
    commands: mpsc::UnboundedReceiver<OutboundCommand>,
    switches: BTreeMap<DeviceId, SimSwitch>,
    wiring: HashMap<(DeviceId, PortNo), Endpoint>,
    pending: VecDeque<Hop>,
    report: TrafficReport,
    next_buffer: u32,
}

impl SimFabric {
    /// Builds the fabric, connects every switch and announces every
    /// leaf-core link.
    pub fn start(config: &ControllerConfig) -> SimResult<Self> {
        let layout = FabricLayout::from_config(&config.fabric);
        let (tx, commands) = mpsc::unbounded_channel();
        let controller = FabricController::new(
            config,
            Box::new(ClosTopology::from_config(&config.fabric)),
            Box::new(ChannelConnector::new(tx)),
        )?;

        let mut fabric = Self {
            layout,
            controller,
            commands,
            switches: BTreeMap::new(),
            wiring: HashMap::new(),
            pending: VecDeque::new(),
            report: TrafficReport::default(),
            next_buffer: 1,
        };
        fabric.wire();

        for event in layout.connection_events() {
            fabric.dispatch(event)?;
        }
        for event in layout.link_events() {
            fabric.dispatch(event)?;
        }
        Ok(fabric)
    }

    fn wire(&mut self) {
        let layout = self.layout;
        for device in layout.switches() {
            let ports = layout.ports_of(device);
            let counters = ports.iter().map(|&p| (p, Counters::default())).collect();
            self.switches.insert(
                device,
                SimSwitch {
                    ports,
                    counters,
                    ..SimSwitch::default()
                },
            );
        }

        let topology = layout.topology();
        for leaf in layout.leaves() {
            // Hosts come back in port order starting at port 1
            for (port, mac) in (1..).map(PortNo::new).zip(topology.hosts_of(leaf)) {
                self.wiring.insert((leaf, port), Endpoint::Host(mac));
            }
        }

        for link in layout.links() {
            self.wiring
                .insert((link.a, link.port_a), Endpoint::Switch(link.b, link.port_b));
            self.wiring
                .insert((link.b, link.port_b), Endpoint::Switch(link.a, link.port_a));
        }
    }

    pub fn layout(&self) -> &FabricLayout {
        &self.layout
    }

    pub fn controller(&self) -> &FabricController {
        &self.controller
    }

    /// Flow table of `device`, in install order.
    pub fn flows(&self, device: DeviceId) -> &[SimFlow] {
        self.switches
            .get(&device)
            .map(|s| s.flows.as_slice())
            .unwrap_or_default()
    }

    pub fn is_flooding(&self, device: DeviceId, port: PortNo) -> bool {
        self.switches
            .get(&device)
            .is_some_and(|s| !s.no_flood.contains(&port))
    }

    /// Cumulative rx+tx bytes seen on a port.
    pub fn port_bytes(&self, device: DeviceId, port: PortNo) -> u64 {
        self.switches
            .get(&device)
            .and_then(|s| s.counters.get(&port))
            .map(|c| c.rx_bytes + c.tx_bytes)
            .unwrap_or(0)
    }

    /// Feeds an event to the controller and applies what it emits.
    pub fn dispatch(&mut self, event: FabricEvent) -> SimResult<()> {
        self.controller.dispatch(event)?;
        self.apply_commands()
    }

    /// Sends one frame from host `src` to host `dst` and walks it to
    /// completion.
    pub fn send(&mut self, src: u32, dst: u32) -> SimResult<TrafficReport> {
        let layout = self.layout;
        for k in [src, dst] {
            if k == 0 || k > layout.host_count() {
                return Err(SimError::UnknownHost(k));
            }
        }

        let frame = ParsedFrame::new(layout.host_mac(src), layout.host_mac(dst));
        debug!("Injecting {} -> {}", frame.src, frame.dst);
        self.report = TrafficReport::default();
        self.pending.push_back(Hop {
            device: layout.host_leaf(src),
            in_port: layout.host_port(src),
            frame,
        });

        let mut hops = 0;
        while let Some(hop) = self.pending.pop_front() {
            hops += 1;
            if hops > MAX_HOPS {
                self.pending.clear();
                return Err(SimError::ForwardingLoop {
                    src: frame.src,
                    dst: frame.dst,
                    hops,
                });
            }
            self.process(hop)?;
        }

        Ok(std::mem::take(&mut self.report))
    }

    /// Runs one telemetry round: tick, then answer every stats request.
    pub fn poll_telemetry(&mut self) -> SimResult<()> {
        self.dispatch(FabricEvent::TelemetryTick)
    }

    /// Takes a leaf-core link down.
    pub fn link_down(&mut self, leaf_index: u32, core_index: u32) -> SimResult<()> {
        let link = self.layout.link(leaf_index, core_index);
        self.dispatch(FabricEvent::LinkEvent {
            link,
            change: LinkChange::Removed,
        })
    }

    /// Drops every rule with a timeout, as if their timers fired.
    pub fn expire_temporary_flows(&mut self) {
        for switch in self.switches.values_mut() {
            switch.flows.retain(SimFlow::is_permanent);
        }
    }

    fn process(&mut self, hop: Hop) -> SimResult<()> {
        let Some(switch) = self.switches.get_mut(&hop.device) else {
            return Ok(());
        };
        if let Some(c) = switch.counters.get_mut(&hop.in_port) {
            c.rx_bytes += FRAME_BYTES;
        }

        if let Some(out) = switch.lookup(hop.in_port, &hop.frame) {
            trace!("{} switches {} -> {} to port {}", hop.device, hop.frame.src, hop.frame.dst, out);
            self.emit(hop.device, hop.in_port, out, hop.frame);
            return Ok(());
        }

        let buffer_id = self.next_buffer;
        self.next_buffer += 1;
        switch.buffers.insert(buffer_id, (hop.in_port, hop.frame));
        self.report.packet_ins.push(hop.device);

        self.dispatch(FabricEvent::PacketIn {
            device: hop.device,
            frame: hop.frame,
            packet: BufferedPacket {
                buffer_id: Some(buffer_id),
                in_port: hop.in_port,
                data: encode_frame(&hop.frame),
            },
        })
    }

    fn apply_commands(&mut self) -> SimResult<()> {
        while let Ok(OutboundCommand { device, command }) = self.commands.try_recv() {
            match command {
                SwitchCommand::PacketOut { packet, out } => {
                    let frame = decode_frame(&packet.data).or_else(|| {
                        let id = packet.buffer_id?;
                        self.switches.get(&device)?.buffers.get(&id).map(|&(_, f)| f)
                    });
                    if let Some(frame) = frame {
                        self.output(device, packet.in_port, out, frame);
                    }
                }
                SwitchCommand::FlowMod {
                    matching,
                    out,
                    idle,
                    hard,
                    buffer_id,
                } => {
                    let Some(switch) = self.switches.get_mut(&device) else {
                        continue;
                    };
                    switch.install(SimFlow {
                        matching,
                        out,
                        idle,
                        hard,
                    });
                    // A buffered frame is released through the new rule
                    let released = buffer_id.and_then(|id| switch.buffers.remove(&id));
                    if let Some((in_port, frame)) = released {
                        self.emit(device, in_port, out, frame);
                    }
                }
                SwitchCommand::PortMod { port, flood } => {
                    if let Some(switch) = self.switches.get_mut(&device) {
                        if flood {
                            switch.no_flood.remove(&port);
                        } else {
                            switch.no_flood.insert(port);
                        }
                    }
                }
                SwitchCommand::PortStatsRequest => {
                    let Some(switch) = self.switches.get(&device) else {
                        continue;
                    };
                    let stats = switch
                        .counters
                        .iter()
                        .map(|(&port, c)| PortStats {
                            port,
                            rx_bytes: c.rx_bytes,
                            tx_bytes: c.tx_bytes,
                        })
                        .collect();
                    self.controller
                        .dispatch(FabricEvent::PortStatsReceived { device, stats })?;
                }
            }
        }
        Ok(())
    }

    fn output(&mut self, device: DeviceId, in_port: PortNo, out: OutputPort, frame: ParsedFrame) {
        match out {
            OutputPort::Physical(port) => self.emit(device, in_port, port, frame),
            OutputPort::Flood => {
                let ports: Vec<PortNo> = self
                    .switches
                    .get(&device)
                    .map(|s| {
                        s.ports
                            .iter()
                            .copied()
                            .filter(|p| *p != in_port && !s.no_flood.contains(p))
                            .collect()
                    })
                    .unwrap_or_default();
                for port in ports {
                    self.emit(device, in_port, port, frame);
                }
            }
        }
    }

    /// Sends a frame out of one port. Output to the ingress port is
    /// dropped, as a switch would without an explicit in-port action.
    fn emit(&mut self, device: DeviceId, in_port: PortNo, out: PortNo, frame: ParsedFrame) {
        if out == in_port {
            return;
        }
        if let Some(c) = self
            .switches
            .get_mut(&device)
            .and_then(|s| s.counters.get_mut(&out))
        {
            c.tx_bytes += FRAME_BYTES;
        }

        match self.wiring.get(&(device, out)) {
            Some(Endpoint::Host(mac)) => {
                if *mac == frame.dst || frame.dst.is_broadcast() {
                    self.report.delivered_to.push(*mac);
                } else {
                    trace!("Host {} drops frame for {}", mac, frame.dst);
                }
            }
            Some(&Endpoint::Switch(next, port)) => self.pending.push_back(Hop {
                device: next,
                in_port: port,
                frame,
            }),
            None => {}
        }
    }
}
