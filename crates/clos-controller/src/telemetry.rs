//! Uplink load telemetry.
//!
//! Leaves are polled for per-port byte counters on a fixed period. For
//! every uplink port in a reply, the controller turns the change of the
//! cumulative rx+tx counter into a byte rate over that period.

use crate::protocol::SwitchCommand;
use crate::session::SwitchSession;
use clos_types::PortNo;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

/// Counters reported for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    pub port: PortNo,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl PortStats {
    /// Combined rx+tx counter.
    pub fn cumulative_bytes(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }
}

/// Last sample stored for an uplink port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortTelemetry {
    /// Cumulative rx+tx bytes at the last sample
    pub cumulative_bytes: u64,
    /// Bytes per second over the last sampling period
    pub rate: u64,
}

impl PortTelemetry {
    pub fn new(cumulative_bytes: u64, rate: u64) -> Self {
        Self {
            cumulative_bytes,
            rate,
        }
    }
}

/// Rate between two cumulative samples, clamped at zero when the counter
/// went backwards (e.g. reset after a reconnect).
pub fn compute_rate(previous: u64, current: u64, interval_secs: u64) -> u64 {
    current.saturating_sub(previous) / interval_secs.max(1)
}

/// Polls leaves and folds their counter replies into session telemetry.
#[derive(Debug, Clone)]
pub struct TelemetrySampler {
    interval_secs: u64,
}

impl TelemetrySampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_secs: interval.as_secs().max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Sends a port statistics request to every connected leaf.
    ///
    /// Returns the number of requests issued.
    pub fn poll<'a>(&self, sessions: impl IntoIterator<Item = &'a mut SwitchSession>) -> usize {
        let mut polled = 0;
        for session in sessions {
            if !session.is_leaf() || !session.is_connected() {
                continue;
            }
            if session.send(SwitchCommand::PortStatsRequest).is_ok() {
                polled += 1;
            }
        }
        trace!("Polled {} leaves for port statistics", polled);
        polled
    }

    /// Records a statistics reply. Only uplink ports are kept.
    ///
    /// Returns the number of uplink samples updated.
    pub fn record(&self, session: &mut SwitchSession, stats: &[PortStats]) -> usize {
        if !session.is_leaf() {
            return 0;
        }

        let mut updated = 0;
        for stat in stats {
            if !session.is_uplink_port(stat.port) {
                continue;
            }
            let previous = session
                .telemetry(stat.port)
                .map(|t| t.cumulative_bytes)
                .unwrap_or(0);
            let current = stat.cumulative_bytes();
            let rate = compute_rate(previous, current, self.interval_secs);
            debug!(
                "Switch {} uplink {}: {} bytes total, {} B/s",
                session.device(),
                stat.port,
                current,
                rate
            );
            session.record_sample(stat.port, PortTelemetry::new(current, rate));
            updated += 1;
        }
        updated
    }
}
