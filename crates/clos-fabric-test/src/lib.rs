//! Integration test infrastructure for the fabric controller
//!
//! Provides:
//! - Fabric layout fixtures with the emulated port numbering
//! - A simulated flow-table dataplane wired to a real controller
//! - Verification helpers for flow tables, learning and deliveries

pub mod fixtures;
pub mod sim;
mod verification;

pub use fixtures::*;
pub use sim::{SimError, SimFabric, SimFlow, SimResult, TrafficReport};
pub use verification::*;
