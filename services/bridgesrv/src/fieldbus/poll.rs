//! Field-bus poll loop
//!
//! Drives `FieldBusMaster::poll_tick` at a fixed period until shutdown.

use std::sync::Arc;
use std::time::Duration;

use common::ShutdownListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::FieldBusMaster;

pub async fn run_poll_loop(
    master: Arc<dyn FieldBusMaster>,
    period: Duration,
    mut shutdown: ShutdownListener,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Field-bus poll loop started ({:?} period)", period);

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => master.poll_tick().await,
        }
    }

    debug!("Field-bus poll loop stopped");
}
