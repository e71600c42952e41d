//! Switch port numbers and output targets.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical port number on a switch.
///
/// Ordered by numeric value; the uplink selector relies on this ordering
/// to break ties between equally loaded uplinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortNo(u16);

impl PortNo {
    /// Creates a port number.
    pub const fn new(port: u16) -> Self {
        PortNo(port)
    }

    /// Returns the numeric value.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for PortNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PortNo {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(PortNo)
            .map_err(|_| ParseError::InvalidPort(s.to_string()))
    }
}

impl From<u16> for PortNo {
    fn from(port: u16) -> Self {
        PortNo(port)
    }
}

/// Where a resent frame leaves the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPort {
    /// A single physical port.
    Physical(PortNo),
    /// Every port except the ingress port and ports with flooding disabled.
    Flood,
}

impl fmt::Display for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputPort::Physical(port) => write!(f, "{}", port),
            OutputPort::Flood => write!(f, "flood"),
        }
    }
}

impl From<PortNo> for OutputPort {
    fn from(port: PortNo) -> Self {
        OutputPort::Physical(port)
    }
}
