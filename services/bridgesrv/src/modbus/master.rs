//! Modbus RTU master over an async byte stream
//!
//! Submissions go into a one-slot queue; `poll_tick` takes the queued request,
//! runs one request/response exchange on the port, updates the register
//! banks and only then completes the submission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::codec::{
    build_read_request, build_write_coils, build_write_registers, frame_rtu,
    parse_read_response, parse_write_response, unframe_rtu, ReadPayload,
};
use super::constants::{
    EXCEPTION_FLAG, FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS, MAX_RTU_FRAME,
};
use crate::fieldbus::{
    BankLayout, FieldBusMaster, MasterError, RegisterBanks, RegisterKind, RequestTimeout,
    WriteData,
};

#[derive(Debug, Clone)]
struct Request {
    kind: RegisterKind,
    slave: u8,
    start: u16,
    count: u16,
    write: Option<WriteData>,
}

struct Queued {
    id: u64,
    request: Request,
    done: oneshot::Sender<Result<(), MasterError>>,
}

pub struct RtuMaster<T> {
    port: tokio::sync::Mutex<T>,
    banks: RegisterBanks,
    queue: Mutex<Option<Queued>>,
    next_id: AtomicU64,
    response_timeout: Duration,
}

impl<T> RtuMaster<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(port: T, layout: BankLayout, response_timeout: Duration) -> Self {
        Self {
            port: tokio::sync::Mutex::new(port),
            banks: RegisterBanks::new(layout),
            queue: Mutex::new(None),
            next_id: AtomicU64::new(0),
            response_timeout,
        }
    }

    async fn submit(&self, request: Request, timeout: RequestTimeout) -> Result<(), MasterError> {
        self.banks
            .check_range(request.kind, request.slave, request.start, request.count)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.queue.lock();
            if slot.is_some() {
                return Err(MasterError::Busy);
            }
            *slot = Some(Queued {
                id,
                request,
                done: tx,
            });
        }

        let outcome = match timeout.as_duration() {
            None => rx.await,
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let mut slot = self.queue.lock();
                    if slot.as_ref().is_some_and(|q| q.id == id) {
                        *slot = None;
                    }
                    return Err(MasterError::Timeout);
                },
            },
        };
        outcome.unwrap_or(Err(MasterError::ReceiveData))
    }

    /// Read exactly one response frame for a request with function code `fc`
    async fn read_response(&self, port: &mut T, fc: u8) -> Result<Vec<u8>, MasterError> {
        let mut frame = vec![0u8; 2];
        port.read_exact(&mut frame).await.map_err(|_| MasterError::ReceiveData)?;

        let remaining = if frame[1] & EXCEPTION_FLAG != 0 {
            // exception code + CRC
            3
        } else if frame[1] == FC_WRITE_MULTIPLE_COILS || frame[1] == FC_WRITE_MULTIPLE_REGISTERS {
            // start + quantity + CRC
            6
        } else if frame[1] == fc {
            let mut count = [0u8; 1];
            port.read_exact(&mut count).await.map_err(|_| MasterError::ReceiveData)?;
            frame.push(count[0]);
            usize::from(count[0]) + 2
        } else {
            return Err(MasterError::ReceiveData);
        };

        if frame.len() + remaining > MAX_RTU_FRAME {
            return Err(MasterError::ReceiveData);
        }
        let offset = frame.len();
        frame.resize(offset + remaining, 0);
        port.read_exact(&mut frame[offset..])
            .await
            .map_err(|_| MasterError::ReceiveData)?;
        Ok(frame)
    }

    async fn exchange(&self, request: &Request) -> Result<(), MasterError> {
        let (pdu, fc) = match &request.write {
            None => (
                build_read_request(request.kind, request.start, request.count)?,
                request.kind.read_function(),
            ),
            Some(WriteData::Coils(packed)) => (
                build_write_coils(request.start, request.count, packed)?,
                FC_WRITE_MULTIPLE_COILS,
            ),
            Some(WriteData::Registers(values)) => {
                let values = values
                    .get(..usize::from(request.count))
                    .ok_or(MasterError::IllegalArgument)?;
                (
                    build_write_registers(request.start, values)?,
                    FC_WRITE_MULTIPLE_REGISTERS,
                )
            },
        };
        let frame = frame_rtu(request.slave, &pdu);

        let mut port = self.port.lock().await;
        let io = async {
            trace!("RTU TX: {:02X?}", frame);
            port.write_all(&frame).await.map_err(|_| MasterError::ReceiveData)?;
            port.flush().await.map_err(|_| MasterError::ReceiveData)?;
            let reply = self.read_response(&mut *port, fc).await?;
            trace!("RTU RX: {:02X?}", reply);
            Ok::<_, MasterError>(reply)
        };
        let reply = tokio::time::timeout(self.response_timeout, io)
            .await
            .map_err(|_| MasterError::Timeout)??;
        drop(port);

        let pdu = unframe_rtu(request.slave, &reply)?;
        let Request {
            kind,
            slave,
            start,
            count,
            ..
        } = *request;

        match &request.write {
            None => match parse_read_response(&pdu, kind, count)? {
                ReadPayload::Bits(packed) => self.banks.store_bits(kind, slave, start, count, &packed),
                ReadPayload::Registers(values) => {
                    self.banks.store_registers(kind, slave, start, &values)
                },
            },
            Some(WriteData::Coils(packed)) => {
                parse_write_response(&pdu, fc, start, count)?;
                self.banks.store_bits(kind, slave, start, count, packed)
            },
            Some(WriteData::Registers(values)) => {
                parse_write_response(&pdu, fc, start, count)?;
                self.banks
                    .store_registers(kind, slave, start, &values[..usize::from(count)])
            },
        }
    }
}

#[async_trait]
impl<T> FieldBusMaster for RtuMaster<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn submit_read(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        count: u16,
        timeout: RequestTimeout,
    ) -> Result<(), MasterError> {
        let request = Request {
            kind,
            slave,
            start,
            count,
            write: None,
        };
        self.submit(request, timeout).await
    }

    async fn submit_write(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        count: u16,
        data: WriteData,
        timeout: RequestTimeout,
    ) -> Result<(), MasterError> {
        let consistent = match (&data, kind) {
            (WriteData::Coils(_), RegisterKind::Coil) => true,
            (WriteData::Registers(values), RegisterKind::HoldingRegister) => {
                values.len() >= usize::from(count)
            },
            _ => false,
        };
        if !consistent {
            return Err(MasterError::IllegalArgument);
        }
        let request = Request {
            kind,
            slave,
            start,
            count,
            write: Some(data),
        };
        self.submit(request, timeout).await
    }

    fn banks(&self) -> &RegisterBanks {
        &self.banks
    }

    async fn poll_tick(&self) {
        let Some(queued) = self.queue.lock().take() else {
            return;
        };
        let result = self.exchange(&queued.request).await;
        match &result {
            Ok(()) => debug!(
                "Slave {} {:?} @{}+{} ok",
                queued.request.slave, queued.request.kind, queued.request.start, queued.request.count
            ),
            Err(e) => warn!(
                "Slave {} {:?} @{}+{} failed: {}",
                queued.request.slave, queued.request.kind, queued.request.start, queued.request.count, e
            ),
        }
        if queued.done.send(result).is_err() {
            debug!("Submitter gone before completion");
        }
    }
}
