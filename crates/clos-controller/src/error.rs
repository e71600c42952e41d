//! Error types for the fabric controller.
//!
//! Errors fall into two classes: the fatal role violation raised when a
//! reconnecting switch is reported with a different role than before, and
//! recoverable conditions that the dispatcher logs and drops. Use
//! [`ControllerError::is_fatal`] to tell them apart.

use clos_types::{DeviceId, MacAddress, SwitchRole};
use thiserror::Error;

/// Result type alias for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors that can occur while handling fabric events.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The topology reported a different role for a known switch.
    #[error("Switch {device} was assigned role {assigned} but the topology now reports {reported}")]
    RoleConflict {
        /// The reconnecting switch.
        device: DeviceId,
        /// Role fixed on the first connection.
        assigned: SwitchRole,
        /// Role reported on this connection.
        reported: SwitchRole,
    },

    /// Event refers to a switch that never connected.
    #[error("Switch {0} is not known to the controller")]
    UnknownDevice(DeviceId),

    /// Event refers to a switch without a live connection.
    #[error("Switch {0} has no live connection")]
    NotConnected(DeviceId),

    /// A leaf has no registered uplink to forward on.
    #[error("No uplink available on switch {0}")]
    NoUplinkAvailable(DeviceId),

    /// Source address has no tenant assignment.
    #[error("No tenant assigned to {0}")]
    UnknownTenant(MacAddress),

    /// Configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Event or command (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ControllerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true if processing must stop.
    ///
    /// Only a role conflict is fatal: it means the topology oracle is
    /// inconsistent and every forwarding decision for the switch is suspect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ControllerError::RoleConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_display() {
        let err = ControllerError::NoUplinkAvailable(DeviceId::new(3));
        assert_eq!(err.to_string(), "No uplink available on switch 00-00-00-00-00-03");
    }

    #[test]
    fn test_role_conflict_is_fatal() {
        let err = ControllerError::RoleConflict {
            device: DeviceId::new(1),
            assigned: SwitchRole::Core,
            reported: SwitchRole::Leaf,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("assigned role core"));
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(!ControllerError::UnknownDevice(DeviceId::new(9)).is_fatal());
        assert!(!ControllerError::UnknownTenant(MacAddress::from_host_index(1)).is_fatal());
        assert!(!ControllerError::config("bad").is_fatal());
    }
}
