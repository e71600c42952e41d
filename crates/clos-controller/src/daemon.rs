//! Single-threaded event loop driving the controller.

use crate::controller::FabricController;
use crate::error::ControllerResult;
use crate::events::FabricEvent;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every event sender was dropped.
    EventsClosed,
    /// The shutdown future completed.
    Shutdown,
}

/// Runs the controller until the event stream ends or `shutdown` fires.
///
/// Events and telemetry ticks are interleaved on the current task, so no
/// two handlers ever run at once. The ticker lives inside this call and is
/// dropped with it. A fatal dispatch error stops the loop and is returned.
pub async fn run(
    controller: &mut FabricController,
    mut events: mpsc::Receiver<FabricEvent>,
    shutdown: impl Future<Output = ()>,
) -> ControllerResult<StopReason> {
    let period = controller.telemetry_interval();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!("Controller loop started, telemetry every {:?}", period);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested");
                return Ok(StopReason::Shutdown);
            }
            // Ahead of events so a busy queue cannot hold back sampling
            _ = ticker.tick() => controller.dispatch(FabricEvent::TelemetryTick)?,
            event = events.recv() => match event {
                Some(event) => controller.dispatch(event)?,
                None => {
                    warn!("Event stream closed");
                    return Ok(StopReason::EventsClosed);
                }
            },
        }
    }
}
