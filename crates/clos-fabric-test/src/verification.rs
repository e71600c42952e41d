//! Verification helpers for fabric scenarios
//!
//! Assertions over the simulated flow tables and the controller's session
//! state, returning descriptive errors instead of panicking.

use crate::sim::{SimFabric, SimFlow};
use clos_controller::FlowMatch;
use clos_types::{DeviceId, MacAddress, PortNo};
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Switch {device} has no flow matching {matching:?}")]
    FlowNotFound { device: DeviceId, matching: FlowMatch },

    #[error("Flow {matching:?} on switch {device} outputs to port {actual}, expected {expected}")]
    WrongOutput {
        device: DeviceId,
        matching: FlowMatch,
        expected: PortNo,
        actual: PortNo,
    },

    #[error("Flow {matching:?} on switch {device} is not permanent")]
    NotPermanent { device: DeviceId, matching: FlowMatch },

    #[error("Switch {0} has no session")]
    UnknownSwitch(DeviceId),

    #[error("Switch {device} maps {mac} to {actual:?}, expected {expected:?}")]
    LearnedMismatch {
        device: DeviceId,
        mac: MacAddress,
        expected: Option<PortNo>,
        actual: Option<PortNo>,
    },

    #[error("Switch {device} has {actual} flows, expected {expected}")]
    FlowCountMismatch {
        device: DeviceId,
        expected: usize,
        actual: usize,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Flow-table and session verification helper
pub struct FabricVerifier<'a> {
    fabric: &'a SimFabric,
}

impl<'a> FabricVerifier<'a> {
    /// Create a new verifier over a running fabric
    pub fn new(fabric: &'a SimFabric) -> Self {
        Self { fabric }
    }

    fn flow(&self, device: DeviceId, matching: FlowMatch) -> VerifyResult<&'a SimFlow> {
        self.fabric
            .flows(device)
            .iter()
            .find(|f| f.matching == matching)
            .ok_or(VerificationError::FlowNotFound { device, matching })
    }

    /// Verify that a flow with this exact match outputs to `out`
    pub fn assert_flow(&self, device: DeviceId, matching: FlowMatch, out: PortNo) -> VerifyResult<()> {
        let flow = self.flow(device, matching)?;
        if flow.out != out {
            return Err(VerificationError::WrongOutput {
                device,
                matching,
                expected: out,
                actual: flow.out,
            });
        }
        Ok(())
    }

    /// Verify a never-expiring flow towards `dst` out of `out`
    pub fn assert_permanent_destination_flow(
        &self,
        device: DeviceId,
        dst: MacAddress,
        out: PortNo,
    ) -> VerifyResult<()> {
        let matching = FlowMatch::destination(dst);
        self.assert_flow(device, matching, out)?;
        if !self.flow(device, matching)?.is_permanent() {
            return Err(VerificationError::NotPermanent { device, matching });
        }
        Ok(())
    }

    /// Verify the pair of permanent rules pinning a conversation
    pub fn assert_pinned_pair(
        &self,
        device: DeviceId,
        src: MacAddress,
        dst: MacAddress,
        out: PortNo,
        reverse: PortNo,
    ) -> VerifyResult<()> {
        for (matching, port) in [(FlowMatch::pair(src, dst), out), (FlowMatch::pair(dst, src), reverse)] {
            self.assert_flow(device, matching, port)?;
            if !self.flow(device, matching)?.is_permanent() {
                return Err(VerificationError::NotPermanent { device, matching });
            }
        }
        Ok(())
    }

    /// Verify how many flows a switch holds
    pub fn assert_flow_count(&self, device: DeviceId, expected: usize) -> VerifyResult<()> {
        let actual = self.fabric.flows(device).len();
        if actual != expected {
            return Err(VerificationError::FlowCountMismatch {
                device,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify the learned port of `mac` on `device` (`None` = not learned)
    pub fn assert_learned(
        &self,
        device: DeviceId,
        mac: MacAddress,
        expected: Option<PortNo>,
    ) -> VerifyResult<()> {
        let session = self
            .fabric
            .controller()
            .session(device)
            .ok_or(VerificationError::UnknownSwitch(device))?;
        let actual = session.learned_port(&mac);
        if actual != expected {
            return Err(VerificationError::LearnedMismatch {
                device,
                mac,
                expected,
                actual,
            });
        }
        Ok(())
    }
}
