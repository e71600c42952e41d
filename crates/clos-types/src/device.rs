//! Datapath identifiers and switch roles.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Datapath identifier of a flow-programmable switch.
///
/// Displays as six hyphen-separated hex octets of the low 48 bits,
/// matching the usual OpenFlow controller notation.
///
/// # Examples
///
/// ```
/// use clos_types::DeviceId;
///
/// let dpid = DeviceId::new(4);
/// assert_eq!(dpid.to_string(), "00-00-00-00-00-04");
/// assert_eq!("00-00-00-00-00-04".parse::<DeviceId>().unwrap(), dpid);
/// assert_eq!("4".parse::<DeviceId>().unwrap(), dpid);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Creates a datapath id from its numeric value.
    pub const fn new(id: u64) -> Self {
        DeviceId(id)
    }

    /// Returns the numeric value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}-{:02x}-{:02x}-{:02x}-{:02x}-{:02x}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

impl FromStr for DeviceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.contains('-') {
            return s
                .parse()
                .map(DeviceId)
                .map_err(|_| ParseError::InvalidDeviceId(s.to_string()));
        }

        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 6 {
            return Err(ParseError::InvalidDeviceId(s.to_string()));
        }

        parts.iter().try_fold(0u64, |acc, part| {
            u8::from_str_radix(part, 16)
                .map(|octet| (acc << 8) | u64::from(octet))
                .map_err(|_| ParseError::InvalidDeviceId(s.to_string()))
        })
        .map(DeviceId)
    }
}

impl From<u64> for DeviceId {
    fn from(id: u64) -> Self {
        DeviceId(id)
    }
}

/// Role of a switch in the leaf-spine fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchRole {
    /// Spine switch; connects only to leaves.
    Core,
    /// Edge switch; connects to hosts and, via uplinks, to cores.
    Leaf,
}

impl SwitchRole {
    /// Maps a topology answer ("is this a core switch?") to a role.
    pub const fn from_is_core(is_core: bool) -> Self {
        if is_core {
            SwitchRole::Core
        } else {
            SwitchRole::Leaf
        }
    }

    /// Returns true for [`SwitchRole::Core`].
    pub const fn is_core(&self) -> bool {
        matches!(self, SwitchRole::Core)
    }
}

impl fmt::Display for SwitchRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwitchRole::Core => "core",
            SwitchRole::Leaf => "leaf",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SwitchRole {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "core" | "spine" => Ok(SwitchRole::Core),
            "leaf" | "edge" => Ok(SwitchRole::Leaf),
            _ => Err(ParseError::InvalidRole(s.to_string())),
        }
    }
}
