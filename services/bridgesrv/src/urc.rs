//! Notification router
//!
//! Unsolicited result codes (URCs) arrive on the same serial link as command
//! responses. The binding table is a closed enum matched by literal prefix;
//! handlers run on the channel's reader task, never block and never issue
//! commands.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bridge::BridgeHandle;
use crate::session::SessionShared;

/// Notification bindings, in match order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Ready,
    MqttStat,
    MqttClose,
    MqttDisc,
    MqttSub,
    MqttUns,
    MqttPubex,
    MqttRecv,
    MqttOpen,
    MqttConn,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 10] = [
        NotificationKind::Ready,
        NotificationKind::MqttStat,
        NotificationKind::MqttClose,
        NotificationKind::MqttDisc,
        NotificationKind::MqttSub,
        NotificationKind::MqttUns,
        NotificationKind::MqttPubex,
        NotificationKind::MqttRecv,
        NotificationKind::MqttOpen,
        NotificationKind::MqttConn,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            NotificationKind::Ready => "RDY",
            NotificationKind::MqttStat => "+QMTSTAT",
            NotificationKind::MqttClose => "+QMTCLOSE",
            NotificationKind::MqttDisc => "+QMTDISC",
            NotificationKind::MqttSub => "+QMTSUB",
            NotificationKind::MqttUns => "+QMTUNS",
            NotificationKind::MqttPubex => "+QMTPUBEX",
            NotificationKind::MqttRecv => "+QMTRECV",
            NotificationKind::MqttOpen => "+QMTOPEN",
            NotificationKind::MqttConn => "+QMTCONN",
        }
    }

    /// First binding whose prefix the line starts with
    pub fn classify(line: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| line.starts_with(kind.prefix()))
    }
}

/// Connection status carried by a `+QMTCONN` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnReport {
    Connected,
    NotConnected,
    Unparsable,
}

/// Comma-separated fields after `<prefix>:`
fn fields<'a>(line: &'a str, prefix: &str) -> Option<Vec<&'a str>> {
    let body = line.strip_prefix(prefix)?.trim_start();
    let body = body.strip_prefix(':')?;
    Some(body.split(',').map(str::trim).collect())
}

/// Interpret `+QMTCONN: <c>,<state>` or `+QMTCONN: <c>,<result>,<ret>`
///
/// State 3 means connected; in the result form, result 0 with return code 0
/// means the connect request was accepted.
pub fn parse_conn_report(line: &str) -> ConnReport {
    let Some(parts) = fields(line, NotificationKind::MqttConn.prefix()) else {
        return ConnReport::Unparsable;
    };
    let nums: Option<Vec<i32>> = parts.iter().map(|p| p.parse().ok()).collect();
    match nums.as_deref() {
        Some([_, state]) => {
            if *state == 3 {
                ConnReport::Connected
            } else {
                ConnReport::NotConnected
            }
        },
        Some([_, result, ret]) => {
            if *result == 0 && *ret == 0 {
                ConnReport::Connected
            } else {
                ConnReport::NotConnected
            }
        },
        _ => ConnReport::Unparsable,
    }
}

/// Result of a `+QMTOPEN: <c>,<result>` report; `None` for the query form
/// `+QMTOPEN: <c>,"<host>",<port>`
fn open_result(line: &str) -> Option<i32> {
    let parts = fields(line, NotificationKind::MqttOpen.prefix())?;
    match parts.as_slice() {
        [_, result] => result.parse::<i32>().ok(),
        _ => None,
    }
}

/// JSON object between the first `{` and the last `}`
pub fn extract_json_object(line: &str) -> Option<&str> {
    let start = line.find('{')?;
    let end = line.rfind('}')?;
    (end > start).then(|| &line[start..=end])
}

/// Demultiplexes notification lines onto session state
pub struct NotificationRouter {
    shared: Arc<SessionShared>,
    inbox: Option<BridgeHandle>,
}

impl NotificationRouter {
    pub fn new(shared: Arc<SessionShared>) -> Self {
        Self {
            shared,
            inbox: None,
        }
    }

    /// Deliver `+QMTRECV` payloads to the bridge pump
    pub fn with_inbox(mut self, inbox: BridgeHandle) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Handle `line` if it matches a binding; returns the binding matched
    pub fn dispatch(&self, line: &str) -> Option<NotificationKind> {
        let kind = NotificationKind::classify(line)?;
        let flags = &self.shared.flags;

        match kind {
            NotificationKind::Ready => {
                info!("Modem reported RDY");
                flags.set_ready(true);
            },
            NotificationKind::MqttOpen => match open_result(line) {
                Some(0) => flags.set_link_open(true),
                Some(result) => warn!("MQTT open failed, result {}", result),
                None => debug!("Link status: {}", line),
            },
            NotificationKind::MqttConn => {
                let report = parse_conn_report(line);
                if self.shared.pending.is_pending() {
                    let connected = report == ConnReport::Connected;
                    if report == ConnReport::Unparsable {
                        warn!("Unparsable connect status: {}", line);
                    }
                    if connected {
                        flags.set_connected(true);
                    }
                    self.shared.pending.resolve(connected);
                } else if report == ConnReport::Connected {
                    flags.set_connected(true);
                } else {
                    debug!("Connect status without a waiter: {}", line);
                }
            },
            NotificationKind::MqttSub | NotificationKind::MqttUns => {
                flags.set_connected(true);
            },
            NotificationKind::MqttStat => {
                warn!("Broker link state changed: {}", line);
            },
            NotificationKind::MqttRecv => self.deliver(line),
            NotificationKind::MqttClose
            | NotificationKind::MqttDisc
            | NotificationKind::MqttPubex => {
                debug!("URC: {}", line);
            },
        }
        Some(kind)
    }

    fn deliver(&self, line: &str) {
        let Some(inbox) = &self.inbox else {
            debug!("Inbound message ignored, no bridge attached");
            return;
        };
        match extract_json_object(line) {
            Some(body) => {
                if let Err(e) = inbox.try_submit(body.as_bytes().to_vec()) {
                    warn!("Inbound message dropped: {}", e);
                }
            },
            None => warn!("Inbound message without a JSON object: {}", line),
        }
    }
}
