//! Runtime lifecycle management
//!
//! Wires the modem channel, broker session, field-bus master and bridge pump
//! together, runs them until a shutdown signal and tears them down in order.

use std::sync::Arc;
use std::time::Duration;

use common::{wait_for_shutdown, ShutdownListener, ShutdownTrigger};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::reconnect::{ReconnectError, ReconnectHelper};
use crate::at::{CommandChannel, LineChannel};
use crate::bridge::{self, BridgePump, Publisher};
use crate::config::{BridgeConfig, FailurePolicy};
use crate::error::{BridgeError, Result};
use crate::fieldbus::{run_poll_loop, FieldBusMaster};
use crate::modbus::RtuMaster;
use crate::serial::open_serial;
use crate::session::{Session, SessionShared};
use crate::urc::NotificationRouter;

/// Components the runtime drives
pub struct BridgeParts {
    pub session: Arc<Session>,
    pub master: Arc<dyn FieldBusMaster>,
    /// Receiving end of the inbox fed by `+QMTRECV` notifications
    pub inbox: mpsc::Receiver<Vec<u8>>,
}

impl BridgeParts {
    /// Open both serial ports and build the component graph
    pub fn open(config: &BridgeConfig) -> Result<Self> {
        let (handle, inbox) = bridge::channel(config.bridge.inbox_capacity);
        let shared = Arc::new(SessionShared::new());
        let router = Arc::new(NotificationRouter::new(Arc::clone(&shared)).with_inbox(handle));

        let modem = open_serial(&config.modem.serial)?;
        let (reader, writer) = tokio::io::split(modem);
        let channel: Arc<dyn CommandChannel> = Arc::new(LineChannel::spawn(reader, writer, router));
        let session = Arc::new(Session::new(channel, shared, config.session_settings()));
        info!("Modem channel open on {}", config.modem.serial.device);

        let port = open_serial(&config.fieldbus.serial)?;
        let master: Arc<dyn FieldBusMaster> = Arc::new(RtuMaster::new(
            port,
            config.fieldbus.banks,
            Duration::from_millis(config.fieldbus.response_timeout_ms),
        ));
        info!("Field-bus master on {}", config.fieldbus.serial.device);

        Ok(Self {
            session,
            master,
            inbox,
        })
    }
}

/// Start the bridge service and run it until Ctrl+C or SIGTERM
pub async fn start_bridge_service(config: BridgeConfig) -> Result<()> {
    let (trigger, _keepalive) = ShutdownTrigger::new();
    let signal_trigger = trigger.clone();
    let signals = tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("Shutdown signal received");
        signal_trigger.trigger();
    });

    let result = match BridgeParts::open(&config) {
        Ok(parts) => run_bridge(parts, &config, trigger).await,
        Err(e) => Err(e),
    };
    signals.abort();
    result
}

/// Run the poll loop, bring the session up, then pump requests until shutdown
///
/// Returns `Err` when the session could not be established within the retry
/// policy, or when the pump failed under the `exit` failure policy.
pub async fn run_bridge(
    parts: BridgeParts,
    config: &BridgeConfig,
    trigger: ShutdownTrigger,
) -> Result<()> {
    let BridgeParts {
        session,
        master,
        inbox,
    } = parts;

    let poll = tokio::spawn(run_poll_loop(
        Arc::clone(&master),
        Duration::from_millis(config.fieldbus.poll_period_ms),
        trigger.listener(),
    ));

    let mut listener = trigger.listener();
    let mut reconnect = ReconnectHelper::new(config.reconnect_policy());
    let established = reconnect
        .run_until_connected(|| session.establish(), &mut listener)
        .await;

    let outcome = match established {
        Ok(()) => {
            info!(
                "Bridge online: subscribed to {}, publishing to {}",
                config.broker.subscribe_topic, config.broker.publish_topic
            );
            let publisher: Arc<dyn Publisher> = session.clone();
            let pump = BridgePump::new(inbox, Arc::clone(&master), publisher, config.pump_settings());
            supervise_pump(
                pump,
                config.bridge.on_failure,
                Duration::from_millis(config.bridge.restart_delay_ms),
                trigger.listener(),
            )
            .await
        },
        Err(ReconnectError::Cancelled) => {
            info!("Shutdown before the broker session came up");
            Ok(())
        },
        Err(e) => Err(BridgeError::protocol(format!(
            "Broker session not established: {}",
            e
        ))),
    };

    info!("Starting graceful shutdown...");
    trigger.trigger();
    if let Err(e) = poll.await {
        warn!("Poll loop task ended abnormally: {}", e);
    }
    if let Err(e) = session.close().await {
        warn!("Failed to close broker session: {}", e);
    }
    info!("Shutdown completed");
    outcome
}

/// Run the pump, restarting it after a fatal failure when the policy says so
async fn supervise_pump(
    mut pump: BridgePump,
    policy: FailurePolicy,
    restart_delay: Duration,
    mut shutdown: ShutdownListener,
) -> Result<()> {
    let stats = pump.stats();
    let result = loop {
        let Err(e) = pump.run(shutdown.clone()).await else {
            break Ok(());
        };
        match policy {
            FailurePolicy::Exit => {
                error!("Bridge pump failed, exiting: {}", e);
                break Err(e);
            },
            FailurePolicy::Restart => {
                error!("Bridge pump failed, restarting in {:?}: {}", restart_delay, e);
                tokio::select! {
                    _ = shutdown.wait() => break Ok(()),
                    _ = tokio::time::sleep(restart_delay) => {},
                }
            },
        }
    };

    let s = stats.snapshot();
    info!(
        "Bridge pump stats: processed={}, decode_failures={}, errors={}, publish_failures={}",
        s.processed, s.decode_failures, s.errors, s.publish_failures
    );
    result
}
