//! Broker session controller
//!
//! Drives the modem's MQTT command set through a `CommandChannel`. Lifecycle
//! flags live in `SessionShared` so the notification router can set them from
//! the channel's reader task while an operation is waiting on them.

pub mod correlation;
pub mod flags;

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::at::{AtResponse, CommandChannel, ResponseSpec};
use crate::error::{BridgeError, ErrorExt, Result};
use crate::urc::{parse_conn_report, ConnReport};

pub use correlation::{CorrelationToken, PendingCorrelation};
pub use flags::{FlagSnapshot, SessionFlags, TriState};

/// State written by the notification router and read by the session
#[derive(Debug, Default)]
pub struct SessionShared {
    pub flags: SessionFlags,
    pub pending: PendingCorrelation,
}

impl SessionShared {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Externally visible lifecycle position, derived on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    WaitReady,
    Ready,
    Configured,
    LinkOpen,
    Connected,
    Subscribed,
    Publishing,
    Closed,
}

/// Broker identity, endpoints and timing used by the session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub client_index: u8,
    pub product_key: String,
    pub device_name: String,
    pub device_secret: String,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub subscribe_topic: String,
    pub publish_topic: String,
    pub qos: u8,
    pub retain: bool,
    pub max_command_len: usize,
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
    pub link_open_timeout: Duration,
    pub ready_probe_interval: Duration,
    pub ready_threshold: u32,
    /// 0 = probe until ready
    pub ready_max_probes: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            client_index: 0,
            product_key: String::new(),
            device_name: String::new(),
            device_secret: String::new(),
            host: String::new(),
            port: 1883,
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            subscribe_topic: String::new(),
            publish_topic: String::new(),
            qos: 0,
            retain: true,
            max_command_len: 256,
            response_timeout: ResponseSpec::DEFAULT_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            link_open_timeout: Duration::from_secs(10),
            ready_probe_interval: Duration::from_millis(500),
            ready_threshold: 5,
            ready_max_probes: 0,
        }
    }
}

/// Command text buffer and response spec, owned behind the operation lock
struct CommandScratch {
    buf: String,
    spec: ResponseSpec,
    max_len: usize,
}

impl CommandScratch {
    fn build(&mut self, args: std::fmt::Arguments<'_>) -> Result<()> {
        self.buf.clear();
        self.buf
            .write_fmt(args)
            .map_err(|_| BridgeError::protocol("Failed to format command"))?;
        if self.buf.len() > self.max_len {
            return Err(BridgeError::protocol(format!(
                "Command exceeds {} bytes",
                self.max_len
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Markers {
    probing: AtomicBool,
    subscribed: AtomicBool,
    publishing: AtomicBool,
    closed: AtomicBool,
}

/// Clears a marker when dropped
struct MarkerGuard<'a>(&'a AtomicBool);

impl<'a> MarkerGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for MarkerGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Require a completed response carrying the final `OK`
fn expect_ok(result: Result<AtResponse>, what: &str) -> Result<AtResponse> {
    match result {
        Ok(resp) if resp.is_ok() => Ok(resp),
        Ok(resp) => Err(BridgeError::protocol(format!(
            "{} returned no OK: {:?}",
            what,
            resp.lines()
        ))),
        Err(e) => Err(BridgeError::protocol(format!("{}: {}", what, e))),
    }
}

fn unquote(field: &str) -> &str {
    field.trim().trim_matches('"')
}

/// Single broker session over one command channel
pub struct Session {
    channel: Arc<dyn CommandChannel>,
    shared: Arc<SessionShared>,
    settings: SessionSettings,
    scratch: tokio::sync::Mutex<CommandScratch>,
    markers: Markers,
    next_message_id: AtomicU16,
}

impl Session {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        shared: Arc<SessionShared>,
        settings: SessionSettings,
    ) -> Self {
        let scratch = CommandScratch {
            buf: String::with_capacity(settings.max_command_len),
            spec: ResponseSpec::new(0, settings.response_timeout),
            max_len: settings.max_command_len,
        };
        Self {
            channel,
            shared,
            settings,
            scratch: tokio::sync::Mutex::new(scratch),
            markers: Markers::default(),
            next_message_id: AtomicU16::new(0),
        }
    }

    pub fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    pub fn flags(&self) -> &SessionFlags {
        &self.shared.flags
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Current response spec (line count and timeout)
    pub async fn response_spec(&self) -> ResponseSpec {
        self.scratch.lock().await.spec
    }

    pub fn state(&self) -> SessionState {
        let flags = self.flags();
        let m = &self.markers;
        if flags.is_connected() {
            if m.publishing.load(Ordering::Acquire) {
                SessionState::Publishing
            } else if m.subscribed.load(Ordering::Acquire) {
                SessionState::Subscribed
            } else {
                SessionState::Connected
            }
        } else if flags.is_link_open() {
            SessionState::LinkOpen
        } else if flags.is_configured() {
            SessionState::Configured
        } else if flags.is_ready() {
            SessionState::Ready
        } else if m.probing.load(Ordering::Acquire) {
            SessionState::WaitReady
        } else if m.closed.load(Ordering::Acquire) {
            SessionState::Closed
        } else {
            SessionState::Init
        }
    }

    /// Probe with `AT` until enough consecutive successes (or an `RDY` report)
    pub async fn wait_until_ready(&self) -> Result<()> {
        let _probing = MarkerGuard::raise(&self.markers.probing);
        let threshold = self.settings.ready_threshold.max(1);
        let max_probes = self.settings.ready_max_probes;
        let mut consecutive = 0u32;
        let mut probes = 0u32;

        loop {
            if self.flags().is_ready() {
                info!("Modem ready");
                return Ok(());
            }
            if max_probes > 0 && probes >= max_probes {
                return Err(BridgeError::timeout(format!(
                    "Modem not ready after {} probes",
                    probes
                )));
            }
            probes += 1;

            let ok = {
                let mut scratch = self.scratch.lock().await;
                scratch.build(format_args!("AT"))?;
                matches!(
                    self.channel.execute(&scratch.buf, scratch.spec).await,
                    Ok(resp) if resp.is_ok()
                )
            };

            if ok {
                consecutive += 1;
                debug!("AT probe ok ({}/{})", consecutive, threshold);
            } else {
                if consecutive > 0 {
                    debug!("AT probe failed, restarting count");
                }
                consecutive = 0;
            }

            if consecutive >= threshold {
                self.flags().set_ready(true);
                self.markers.closed.store(false, Ordering::Release);
                info!("Modem ready after {} probes", probes);
                return Ok(());
            }

            self.flags()
                .wait_until(|f| f.is_ready(), self.settings.ready_probe_interval)
                .await;
        }
    }

    fn aliauth_matches(&self, resp: &AtResponse) -> bool {
        let Some(body) = resp.find_prefixed("+QMTCFG:") else {
            return false;
        };
        let reported: Vec<&str> = body.split(',').skip(1).map(unquote).collect();
        let s = &self.settings;
        reported
            == [
                s.product_key.as_str(),
                s.device_name.as_str(),
                s.device_secret.as_str(),
            ]
    }

    /// Make sure the modem holds this device's authentication triple
    pub async fn configure(&self) -> Result<()> {
        if !self.flags().is_ready() {
            warn!("configure() before the modem reported ready");
        }
        let s = &self.settings;
        let mut scratch = self.scratch.lock().await;

        scratch.build(format_args!("AT+QMTCFG=\"aliauth\",{}", s.client_index))?;
        match self.channel.execute(&scratch.buf, scratch.spec).await {
            Ok(resp) if self.aliauth_matches(&resp) => {
                self.flags().set_configured(true);
                debug!("Authentication already configured");
                return Ok(());
            },
            Ok(_) => debug!("Authentication differs, setting it"),
            Err(e) => debug!("Authentication query failed: {}", e),
        }

        scratch.build(format_args!(
            "AT+QMTCFG=\"aliauth\",{},\"{}\",\"{}\",\"{}\"",
            s.client_index, s.product_key, s.device_name, s.device_secret
        ))?;
        expect_ok(
            self.channel.execute(&scratch.buf, scratch.spec).await,
            "AT+QMTCFG",
        )?;
        self.flags().set_configured(true);
        info!("Authentication configured for {}", s.device_name);
        Ok(())
    }

    fn open_target_matches(&self, resp: &AtResponse) -> bool {
        let Some(body) = resp.find_prefixed("+QMTOPEN:") else {
            return false;
        };
        let fields: Vec<&str> = body.split(',').map(unquote).collect();
        let s = &self.settings;
        match fields.as_slice() {
            [client, host, port] => {
                client.parse::<u8>().ok() == Some(s.client_index)
                    && *host == s.host
                    && port.parse::<u16>().ok() == Some(s.port)
            },
            _ => false,
        }
    }

    /// Open the network link to the broker unless it is already open
    ///
    /// A successful set only means the request was accepted; the link is
    /// reported open later by a `+QMTOPEN` notification.
    pub async fn open(&self) -> Result<()> {
        if !self.flags().is_configured() {
            warn!("open() before configuration");
        }
        let s = &self.settings;
        let mut scratch = self.scratch.lock().await;

        scratch.build(format_args!("AT+QMTOPEN?"))?;
        match self.channel.execute(&scratch.buf, scratch.spec).await {
            Ok(resp) if self.open_target_matches(&resp) => {
                self.flags().set_link_open(true);
                debug!("Link to {}:{} already open", s.host, s.port);
                return Ok(());
            },
            Ok(_) => {},
            Err(e) => debug!("Link query failed: {}", e),
        }

        scratch.build(format_args!(
            "AT+QMTOPEN={},\"{}\",{}",
            s.client_index, s.host, s.port
        ))?;
        expect_ok(
            self.channel.execute(&scratch.buf, scratch.spec).await,
            "AT+QMTOPEN",
        )?;
        info!("Opening link to {}:{}", s.host, s.port);
        Ok(())
    }

    /// Connect the MQTT client, reusing an existing connection when the modem reports one
    pub async fn connect(&self) -> Result<()> {
        if self.flags().is_connected() {
            debug!("Already connected");
            return Ok(());
        }
        if !self.flags().is_link_open() {
            warn!("connect() before the link is open");
        }
        let s = &self.settings;
        let pending = &self.shared.pending;
        let mut scratch = self.scratch.lock().await;

        // Query: the status may come back in the response or as a notification
        let (token, rx) = pending.arm();
        if let Err(e) = scratch.build(format_args!("AT+QMTCONN?")) {
            pending.clear(token);
            return Err(e);
        }
        match self.channel.execute(&scratch.buf, scratch.spec).await {
            Ok(resp) => {
                let reported = resp
                    .lines()
                    .iter()
                    .find(|l| l.starts_with("+QMTCONN"))
                    .map(|l| parse_conn_report(l));
                if reported == Some(ConnReport::Connected) {
                    pending.clear(token);
                    self.flags().set_connected(true);
                    info!("Broker session already connected");
                    return Ok(());
                }
                match tokio::time::timeout(s.response_timeout, rx).await {
                    Ok(Ok(true)) => {
                        self.flags().set_connected(true);
                        info!("Broker session already connected");
                        return Ok(());
                    },
                    Ok(_) => {},
                    Err(_) => {
                        pending.clear(token);
                    },
                }
            },
            Err(e) => {
                pending.clear(token);
                debug!("Connect query failed: {}", e);
            },
        }

        // Explicit connect, acknowledged asynchronously
        let (token, rx) = pending.arm();
        if let Err(e) = scratch.build(format_args!(
            "AT+QMTCONN={},\"{}\",\"{}\",\"{}\"",
            s.client_index, s.client_id, s.username, s.password
        )) {
            pending.clear(token);
            return Err(e);
        }
        if let Err(e) = expect_ok(
            self.channel.execute(&scratch.buf, scratch.spec).await,
            "AT+QMTCONN",
        ) {
            pending.clear(token);
            return Err(e);
        }

        match tokio::time::timeout(s.connect_timeout, rx).await {
            Ok(Ok(true)) => {
                self.flags().set_connected(true);
                info!("Broker session connected as {}", s.client_id);
                Ok(())
            },
            Ok(Ok(false)) => Err(BridgeError::protocol("Broker refused the connection")),
            Ok(Err(_)) => Err(BridgeError::protocol(
                "Connect acknowledgement superseded",
            )),
            Err(_) => {
                pending.clear(token);
                Err(BridgeError::protocol(format!(
                    "No connect acknowledgement within {:?}",
                    s.connect_timeout
                )))
            },
        }
    }

    pub async fn subscribe(&self) -> Result<()> {
        if !self.flags().is_connected() {
            warn!("subscribe() before connect");
        }
        let s = &self.settings;
        let mut scratch = self.scratch.lock().await;
        scratch.build(format_args!(
            "AT+QMTSUB={},1,\"{}\",{}",
            s.client_index, s.subscribe_topic, s.qos
        ))?;
        expect_ok(
            self.channel.execute(&scratch.buf, scratch.spec).await,
            "AT+QMTSUB",
        )?;
        self.flags().set_connected(true);
        self.markers.subscribed.store(true, Ordering::Release);
        info!("Subscribed to {}", s.subscribe_topic);
        Ok(())
    }

    pub async fn unsubscribe(&self) -> Result<()> {
        let s = &self.settings;
        let mut scratch = self.scratch.lock().await;
        scratch.build(format_args!(
            "AT+QMTUNS={},1,\"{}\"",
            s.client_index, s.subscribe_topic
        ))?;
        expect_ok(
            self.channel.execute(&scratch.buf, scratch.spec).await,
            "AT+QMTUNS",
        )?;
        self.flags().set_connected(true);
        self.markers.subscribed.store(false, Ordering::Release);
        info!("Unsubscribed from {}", s.subscribe_topic);
        Ok(())
    }

    fn message_id(&self) -> u16 {
        if self.settings.qos == 0 {
            return 0;
        }
        // 1..=65535, 0 is reserved for QoS 0
        loop {
            let id = self
                .next_message_id
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }

    /// Publish `payload` on the configured topic
    ///
    /// Phase one announces the length and waits for the data prompt (one
    /// line); phase two sends the payload and requires `OK`.
    pub async fn publish(&self, payload: &[u8]) -> Result<()> {
        if !self.flags().is_connected() {
            warn!("publish() before connect");
        }
        let body = std::str::from_utf8(payload)
            .map_err(|_| BridgeError::argument("Payload is not valid UTF-8"))?;
        let s = &self.settings;
        let _publishing = MarkerGuard::raise(&self.markers.publishing);
        let mut scratch = self.scratch.lock().await;

        scratch.build(format_args!(
            "AT+QMTPUBEX={},{},{},{},\"{}\",{}",
            s.client_index,
            self.message_id(),
            s.qos,
            u8::from(s.retain),
            s.publish_topic,
            payload.len()
        ))?;

        let saved = scratch.spec;
        scratch.spec.line_count = 1;
        let announced = self.channel.execute(&scratch.buf, scratch.spec).await;
        scratch.spec = saved;

        let resp = announced.protocol_error("AT+QMTPUBEX")?;
        if !resp.has_prompt() {
            return Err(BridgeError::protocol(format!(
                "AT+QMTPUBEX: no data prompt: {:?}",
                resp.lines()
            )));
        }

        expect_ok(
            self.channel.execute(body, scratch.spec).await,
            "publish payload",
        )?;
        debug!("Published {} bytes to {}", payload.len(), s.publish_topic);
        Ok(())
    }

    /// Disconnect from the broker and forget all lifecycle state
    pub async fn close(&self) -> Result<()> {
        let had_link = self.flags().is_link_open() || self.flags().is_connected();
        let mut scratch = self.scratch.lock().await;
        scratch.build(format_args!("AT+QMTDISC={}", self.settings.client_index))?;
        let result = expect_ok(
            self.channel.execute(&scratch.buf, scratch.spec).await,
            "AT+QMTDISC",
        );

        self.flags().reset();
        self.shared.pending.resolve(false);
        self.markers.subscribed.store(false, Ordering::Release);
        self.markers.closed.store(true, Ordering::Release);

        match result {
            Ok(_) => {
                info!("Broker session closed");
                Ok(())
            },
            Err(e) if !had_link => {
                debug!("Nothing to close: {}", e);
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    /// Full bring-up: ready, configured, link open, connected, subscribed
    pub async fn establish(&self) -> Result<()> {
        self.wait_until_ready().await?;
        self.configure().await?;
        self.open().await?;
        if !self
            .flags()
            .wait_until(|f| f.is_link_open(), self.settings.link_open_timeout)
            .await
        {
            return Err(BridgeError::protocol(format!(
                "Link to {}:{} not reported open within {:?}",
                self.settings.host, self.settings.port, self.settings.link_open_timeout
            )));
        }
        self.connect().await?;
        self.subscribe().await?;
        self.markers.closed.store(false, Ordering::Release);
        Ok(())
    }
}
