//! Least-loaded uplink selection.

use crate::error::{ControllerError, ControllerResult};
use crate::session::SwitchSession;
use clos_types::PortNo;

/// Picks the uplink with the lowest sampled rate.
///
/// Uplinks without a sample yet count as idle. Ties go to the lowest port
/// number, so the choice does not depend on map iteration order.
pub fn select_least_loaded(session: &SwitchSession) -> ControllerResult<PortNo> {
    session
        .uplinks()
        .values()
        .map(|&port| {
            let rate = session.telemetry(port).map(|t| t.rate).unwrap_or(0);
            (rate, port)
        })
        .min()
        .map(|(_, port)| port)
        .ok_or(ControllerError::NoUplinkAvailable(session.device()))
}
