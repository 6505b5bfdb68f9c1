//! Test Common Utilities
//!
//! Scripted modem channel, in-memory field-bus master and a recording publisher
//! shared by the bridgesrv integration tests.

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use bridgesrv::at::{is_error_line, AtResponse, CommandChannel, ResponseSpec};
use bridgesrv::bridge::Publisher;
use bridgesrv::error::{BridgeError, Result};
use bridgesrv::fieldbus::{
    FieldBusMaster, MasterError, RegisterBanks, RegisterKind, RequestTimeout, WriteData,
};
use bridgesrv::session::{Session, SessionSettings, SessionShared};
use bridgesrv::urc::NotificationRouter;

/// One expected command and the modem's scripted behaviour
pub struct Step {
    expect: String,
    before: Vec<String>,
    reply: Result<Vec<String>>,
    after: Option<(Duration, String)>,
}

impl Step {
    /// Expect a command starting with `prefix`, answered with `OK`
    pub fn ok(prefix: &str) -> Self {
        Self::reply(prefix, &["OK"])
    }

    pub fn reply(prefix: &str, lines: &[&str]) -> Self {
        Self {
            expect: prefix.to_string(),
            before: Vec::new(),
            reply: Ok(lines.iter().map(|l| l.to_string()).collect()),
            after: None,
        }
    }

    /// The modem never answers
    pub fn silent(prefix: &str) -> Self {
        Self {
            expect: prefix.to_string(),
            before: Vec::new(),
            reply: Err(BridgeError::timeout(format!("No response to {prefix}"))),
            after: None,
        }
    }

    /// Notification delivered before the response lines
    pub fn urc_before(mut self, line: &str) -> Self {
        self.before.push(line.to_string());
        self
    }

    /// Notification delivered `delay` after the response completed
    pub fn urc_after(mut self, delay: Duration, line: &str) -> Self {
        self.after = Some((delay, line.to_string()));
        self
    }
}

/// `CommandChannel` that plays back a script and routes every line like the real channel
pub struct ScriptedChannel {
    router: Arc<NotificationRouter>,
    steps: Mutex<VecDeque<Step>>,
    sent: Mutex<Vec<(String, ResponseSpec)>>,
}

impl ScriptedChannel {
    pub fn new(router: Arc<NotificationRouter>, steps: Vec<Step>) -> Self {
        Self {
            router,
            steps: Mutex::new(steps.into()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    /// Commands sent so far
    pub fn commands(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    /// Response specs the commands were sent with
    pub fn specs(&self) -> Vec<ResponseSpec> {
        self.sent.lock().iter().map(|(_, s)| *s).collect()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn execute(&self, command: &str, spec: ResponseSpec) -> Result<AtResponse> {
        self.sent.lock().push((command.to_string(), spec));
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected command {command:?}"));
        assert!(
            command.starts_with(&step.expect),
            "expected {:?}, got {:?}",
            step.expect,
            command
        );

        for line in &step.before {
            self.router.dispatch(line);
        }
        let result = match step.reply {
            Ok(lines) => {
                for line in &lines {
                    self.router.dispatch(line);
                }
                match lines.iter().find(|l| is_error_line(l)) {
                    Some(line) => Err(BridgeError::protocol(format!("{command} failed: {line}"))),
                    None => Ok(AtResponse::new(lines)),
                }
            },
            Err(e) => Err(e),
        };
        if let Some((delay, line)) = step.after {
            let router = Arc::clone(&self.router);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                router.dispatch(&line);
            });
        }
        result
    }
}

pub fn test_settings() -> SessionSettings {
    SessionSettings {
        client_index: 0,
        product_key: "pk".to_string(),
        device_name: "dev01".to_string(),
        device_secret: "secret".to_string(),
        host: "broker.example.com".to_string(),
        port: 1883,
        client_id: "dev01".to_string(),
        username: "user".to_string(),
        password: "pass".to_string(),
        subscribe_topic: "/pk/dev01/get".to_string(),
        publish_topic: "/pk/dev01/update".to_string(),
        response_timeout: Duration::from_millis(100),
        connect_timeout: Duration::from_millis(500),
        link_open_timeout: Duration::from_millis(500),
        ready_probe_interval: Duration::from_millis(1),
        ..SessionSettings::default()
    }
}

/// Session over a scripted channel, with the shared state the router writes
pub fn scripted_session(
    settings: SessionSettings,
    steps: Vec<Step>,
) -> (Session, Arc<ScriptedChannel>, Arc<SessionShared>) {
    let shared = Arc::new(SessionShared::new());
    let router = Arc::new(NotificationRouter::new(Arc::clone(&shared)));
    let channel = Arc::new(ScriptedChannel::new(router, steps));
    let session = Session::new(channel.clone(), Arc::clone(&shared), settings);
    (session, channel, shared)
}

/// Master whose bus answers instantly out of its own banks
#[derive(Default)]
pub struct MemoryMaster {
    banks: RegisterBanks,
    calls: AtomicUsize,
    failure: Mutex<Option<MasterError>>,
}

impl MemoryMaster {
    /// Fail every following request with `err`
    pub fn fail_with(&self, err: MasterError) {
        *self.failure.lock() = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        count: u16,
    ) -> std::result::Result<(), MasterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = *self.failure.lock() {
            return Err(err);
        }
        self.banks.check_range(kind, slave, start, count)
    }
}

#[async_trait]
impl FieldBusMaster for MemoryMaster {
    async fn submit_read(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        count: u16,
        _timeout: RequestTimeout,
    ) -> std::result::Result<(), MasterError> {
        self.begin(kind, slave, start, count)
    }

    async fn submit_write(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        count: u16,
        data: WriteData,
        _timeout: RequestTimeout,
    ) -> std::result::Result<(), MasterError> {
        self.begin(kind, slave, start, count)?;
        match data {
            WriteData::Coils(packed) => self.banks.store_bits(kind, slave, start, count, &packed),
            WriteData::Registers(values) => self.banks.store_registers(kind, slave, start, &values),
        }
    }

    fn banks(&self) -> &RegisterBanks {
        &self.banks
    }

    async fn poll_tick(&self) {}
}

/// Publisher that keeps every payload
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::protocol("AT+QMTPUBEX: no data prompt"));
        }
        self.published
            .lock()
            .push(String::from_utf8_lossy(payload).into_owned());
        Ok(())
    }
}
