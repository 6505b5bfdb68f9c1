//! Bridge pump
//!
//! Takes one encoded request at a time from the inbox, runs it against the
//! field-bus master and publishes the encoded result through the broker
//! session.

pub mod message;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::ShutdownListener;
use errors::{log_error, ErrorClass};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::fieldbus::{pack_bits, FieldBusMaster, MasterError, RequestTimeout, WriteData};
use crate::session::Session;

pub use message::{BridgeRequest, BridgeResult, Direction, FunctionCode, ResultCode};

/// Outbound side of the bridge
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<()>;
}

#[async_trait]
impl Publisher for Session {
    async fn publish(&self, payload: &[u8]) -> Result<()> {
        Session::publish(self, payload).await
    }
}

/// Producer handle onto the pump's inbox
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<Vec<u8>>,
}

impl BridgeHandle {
    /// Queue a request, waiting for room
    pub async fn submit(&self, request: Vec<u8>) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| BridgeError::io("Bridge inbox closed"))
    }

    /// Queue a request without waiting
    pub fn try_submit(&self, request: Vec<u8>) -> Result<()> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BridgeError::resource("Bridge inbox full"),
            mpsc::error::TrySendError::Closed(_) => BridgeError::io("Bridge inbox closed"),
        })
    }
}

/// Inbox for a pump plus the handle that feeds it
pub fn channel(capacity: usize) -> (BridgeHandle, mpsc::Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BridgeHandle { tx }, rx)
}

/// Pump counters (observability only)
#[derive(Debug, Default)]
pub struct PumpStats {
    processed: AtomicU64,
    decode_failures: AtomicU64,
    errors: AtomicU64,
    publish_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStatsSnapshot {
    pub processed: u64,
    pub decode_failures: u64,
    pub errors: u64,
    pub publish_failures: u64,
}

impl PumpStats {
    pub fn snapshot(&self) -> PumpStatsSnapshot {
        PumpStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    pub request_timeout: RequestTimeout,
    pub max_payload_len: usize,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            request_timeout: RequestTimeout::Forever,
            max_payload_len: 256,
        }
    }
}

pub struct BridgePump {
    inbox: mpsc::Receiver<Vec<u8>>,
    master: Arc<dyn FieldBusMaster>,
    publisher: Arc<dyn Publisher>,
    settings: PumpSettings,
    outbound: Vec<u8>,
    stats: Arc<PumpStats>,
}

impl BridgePump {
    pub fn new(
        inbox: mpsc::Receiver<Vec<u8>>,
        master: Arc<dyn FieldBusMaster>,
        publisher: Arc<dyn Publisher>,
        settings: PumpSettings,
    ) -> Self {
        Self {
            inbox,
            master,
            publisher,
            outbound: Vec::with_capacity(settings.max_payload_len),
            settings,
            stats: Arc::new(PumpStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PumpStats> {
        Arc::clone(&self.stats)
    }

    /// Serve requests until shutdown or the inbox closes
    ///
    /// Returns `Err` only for a fatal failure (resource exhaustion); the
    /// caller decides whether to run the pump again.
    pub async fn run(&mut self, mut shutdown: ShutdownListener) -> Result<()> {
        info!("Bridge pump started");
        loop {
            let raw = tokio::select! {
                _ = shutdown.wait() => {
                    info!("Bridge pump stopping");
                    return Ok(());
                }
                msg = self.inbox.recv() => match msg {
                    Some(raw) => raw,
                    None => {
                        info!("Bridge inbox closed");
                        return Ok(());
                    }
                },
            };

            match self.process_one(&raw).await {
                Ok(_) => {},
                Err(e) if e.is_fatal() => {
                    error!("Bridge pump aborted: {}", e);
                    return Err(e);
                },
                Err(e) => log_error("bridge request", &e),
            }
        }
    }

    /// One pump iteration; `Ok(None)` when the request was not decodable
    pub async fn process_one(&mut self, raw: &[u8]) -> Result<Option<BridgeResult>> {
        PumpStats::bump(&self.stats.processed);

        let request = match BridgeRequest::decode(raw) {
            Ok(request) => request,
            Err(e @ BridgeError::ResourceError(_)) => return Err(e),
            Err(e) => {
                PumpStats::bump(&self.stats.decode_failures);
                warn!("Dropping request: {}", e);
                return Ok(None);
            },
        };
        debug!("Bridge request: {:?}", request);

        let result = self.dispatch(&request).await;
        if !result.code.is_success() {
            PumpStats::bump(&self.stats.errors);
        }

        if let Err(e) = result.encode_into(&mut self.outbound, self.settings.max_payload_len) {
            PumpStats::bump(&self.stats.publish_failures);
            return Err(e);
        }
        if let Err(e) = self.publisher.publish(&self.outbound).await {
            PumpStats::bump(&self.stats.publish_failures);
            warn!("Failed to publish result: {}", e);
        }
        Ok(Some(result))
    }

    async fn dispatch(&self, request: &BridgeRequest) -> BridgeResult {
        let kind = request.function.register_kind();
        let timeout = self.settings.request_timeout;
        let BridgeRequest {
            slave,
            start,
            count,
            ..
        } = *request;

        let outcome: std::result::Result<Option<Vec<u16>>, MasterError> =
            match (request.direction, &request.data) {
                (Direction::Write, _) if !kind.is_writable() => {
                    let err = BridgeError::argument(format!(
                        "{:?} is read-only (slave {}, start {})",
                        kind, slave, start
                    ));
                    warn!("{}", err);
                    Err(MasterError::IllegalArgument)
                },
                (Direction::Write, Some(values)) => {
                    let data = if kind.is_bit() {
                        WriteData::Coils(pack_bits(values))
                    } else {
                        WriteData::Registers(values.clone())
                    };
                    self.master
                        .submit_write(kind, slave, start, count, data, timeout)
                        .await
                        .map(|()| None)
                },
                (Direction::Write, None) => Err(MasterError::IllegalArgument),
                (Direction::Read, _) => {
                    match self
                        .master
                        .submit_read(kind, slave, start, count, timeout)
                        .await
                    {
                        Ok(()) => self
                            .master
                            .banks()
                            .read_values(kind, slave, start, count)
                            .map(Some),
                        Err(e) => Err(e),
                    }
                },
            };

        match outcome {
            Ok(data) => BridgeResult {
                function: request.function,
                code: ResultCode::Success,
                data,
            },
            Err(e) => {
                debug!("Field-bus request failed: {}", e);
                BridgeResult::without_data(request.function, e.into())
            },
        }
    }
}
