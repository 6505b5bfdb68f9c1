//! Line-oriented command channel over an async byte stream
//!
//! A reader task splits the stream into lines. Every line is first offered to
//! the notification router; the line is then appended to the response of the
//! command in flight, if any. Notification lines never count towards a
//! response's expected line count and never complete it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace, warn};

use super::codec::AtLineCodec;
use super::{is_error_line, AtResponse, CommandChannel, ResponseSpec, FINAL_OK};
use crate::error::{BridgeError, Result};
use crate::urc::NotificationRouter;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Inflight {
    label: String,
    lines: Vec<String>,
    line_count: usize,
    counted: usize,
    done: oneshot::Sender<Result<AtResponse>>,
}

impl Inflight {
    /// Feed one line; returns the outcome once the response is complete
    fn accept(&mut self, line: &str, is_notification: bool) -> Option<Result<()>> {
        self.lines.push(line.to_string());

        if is_error_line(line) {
            return Some(Err(BridgeError::protocol(format!(
                "{} failed: {}",
                self.label, line
            ))));
        }
        if is_notification {
            return None;
        }
        if self.line_count > 0 {
            self.counted += 1;
            if self.counted >= self.line_count {
                return Some(Ok(()));
            }
            return None;
        }
        if line == FINAL_OK {
            return Some(Ok(()));
        }
        None
    }
}

/// Short command name for logs and errors (`AT+QMTOPEN=...` -> `AT+QMTOPEN`)
fn command_label(command: &str) -> String {
    if !command.starts_with("AT") {
        return format!("payload ({} bytes)", command.len());
    }
    command
        .split(['=', '?'])
        .next()
        .unwrap_or(command)
        .to_string()
}

/// Reference `CommandChannel` over a serial port or any byte stream
pub struct LineChannel {
    writer: tokio::sync::Mutex<BoxedWriter>,
    inflight: Arc<Mutex<Option<Inflight>>>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl LineChannel {
    /// Start the reader task; notification bindings come with `router`
    pub fn spawn<R, W>(reader: R, writer: W, router: Arc<NotificationRouter>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let inflight = Arc::new(Mutex::new(None));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            FramedRead::new(reader, AtLineCodec::new()),
            router,
            Arc::clone(&inflight),
            Arc::clone(&closed),
        ));

        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            inflight,
            closed,
            reader,
        }
    }

    /// Whether the reader has stopped (stream ended or failed)
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for LineChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(
    mut lines: FramedRead<R, AtLineCodec>,
    router: Arc<NotificationRouter>,
    inflight: Arc<Mutex<Option<Inflight>>>,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    while let Some(item) = lines.next().await {
        match item {
            Ok(line) => route_line(&line, &router, &inflight),
            Err(e) => {
                warn!("AT RX error: {}", e);
                break;
            },
        }
    }

    closed.store(true, Ordering::Release);
    if let Some(pending) = inflight.lock().take() {
        let _ = pending.done.send(Err(BridgeError::channel_closed()));
    }
    warn!("AT channel reader stopped");
}

fn route_line(line: &str, router: &NotificationRouter, inflight: &Mutex<Option<Inflight>>) {
    trace!("AT RX: {}", line);
    let is_notification = router.dispatch(line).is_some();

    let mut guard = inflight.lock();
    let Some(pending) = guard.as_mut() else {
        if !is_notification {
            debug!("Unsolicited line dropped: {}", line);
        }
        return;
    };

    if let Some(outcome) = pending.accept(line, is_notification) {
        if let Some(done) = guard.take() {
            let result = outcome.map(|()| AtResponse::new(done.lines));
            let _ = done.done.send(result);
        }
    }
}

#[async_trait]
impl CommandChannel for LineChannel {
    async fn execute(&self, command: &str, spec: ResponseSpec) -> Result<AtResponse> {
        if self.is_closed() {
            return Err(BridgeError::channel_closed());
        }

        // Holding the writer for the whole exchange keeps one command in flight
        let mut writer = self.writer.lock().await;
        let label = command_label(command);
        let (tx, rx) = oneshot::channel();
        *self.inflight.lock() = Some(Inflight {
            label: label.clone(),
            lines: Vec::new(),
            line_count: spec.line_count,
            counted: 0,
            done: tx,
        });
        if self.is_closed() {
            self.inflight.lock().take();
            return Err(BridgeError::channel_closed());
        }

        trace!("AT TX: {}", command);
        let exchange = async {
            writer.write_all(command.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
            writer.flush().await?;
            rx.await.unwrap_or_else(|_| Err(BridgeError::channel_closed()))
        };

        match tokio::time::timeout(spec.timeout, exchange).await {
            Ok(result) => {
                if result.is_err() {
                    self.inflight.lock().take();
                }
                result
            },
            Err(_) => {
                self.inflight.lock().take();
                Err(BridgeError::timeout(format!(
                    "No response to {} within {:?}",
                    label, spec.timeout
                )))
            },
        }
    }
}
