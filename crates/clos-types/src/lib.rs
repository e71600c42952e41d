//! Common types for leaf-spine fabric control.
//!
//! This crate provides type-safe representations of the primitives shared
//! by the controller and its test harness:
//!
//! - [`MacAddress`]: 48-bit Ethernet hardware addresses
//! - [`DeviceId`]: datapath identifiers of flow-programmable switches
//! - [`PortNo`] / [`OutputPort`]: switch port numbers and output targets
//! - [`SwitchRole`]: core (spine) or leaf (edge) classification
//! - [`TenantVlan`]: tenant isolation domain index

mod device;
mod mac;
mod port;
mod vlan;

pub use device::{DeviceId, SwitchRole};
pub use mac::MacAddress;
pub use port::{OutputPort, PortNo};
pub use vlan::TenantVlan;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid datapath id: {0}")]
    InvalidDeviceId(String),

    #[error("invalid port number: {0}")]
    InvalidPort(String),

    #[error("invalid tenant VLAN: {0} (must be 0-4094)")]
    InvalidTenantVlan(u16),

    #[error("invalid switch role: {0}")]
    InvalidRole(String),
}
