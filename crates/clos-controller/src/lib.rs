//! Adaptive leaf-spine fabric controller
//!
//! Reacts to switch, link, packet and telemetry events from a two-tier Clos
//! fabric of flow-programmable switches. Leaves learn addresses and spread
//! unknown traffic over the least-loaded uplink; cores learn and pin
//! destinations permanently. With tenant isolation enabled, each tenant
//! VLAN is confined to one owning core.

pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod events;
pub mod forwarding;
pub mod jsonl;
pub mod link;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod tenant;
pub mod topology;
pub mod uplink;

pub use config::{
    ControllerConfig, FabricConfig, ForwardingConfig, LinkConfig, TelemetryConfig, TenantConfig,
    DEFAULT_CONFIG_PATH, MAX_FABRIC_HOSTS,
};
pub use controller::FabricController;
pub use daemon::{run, StopReason};
pub use error::{ControllerError, ControllerResult};
pub use events::{FabricEvent, ParsedFrame, PortStatusReason};
pub use forwarding::ForwardingEngine;
pub use link::{LinkChange, LinkObservation, LinkRolePropagator};
pub use protocol::{
    BufferedPacket, ChannelConnection, ChannelConnector, Connector, FlowMatch, FlowTimeout,
    OutboundCommand, SwitchCommand, SwitchConnection,
};
pub use session::SwitchSession;
pub use telemetry::{compute_rate, PortStats, PortTelemetry, TelemetrySampler};
pub use tenant::{install_bidirectional, TenantAssignment, TenantRegistry};
pub use topology::{ClosTopology, TopologyOracle};
pub use uplink::select_least_loaded;
