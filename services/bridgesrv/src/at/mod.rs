//! AT command channel
//!
//! `CommandChannel` is the seam between the session and the modem: execute one
//! command, collect its response lines, fail on timeout. `LineChannel` is the
//! reference implementation over any async byte stream.

pub mod channel;
pub mod codec;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use channel::LineChannel;
pub use codec::AtLineCodec;

/// Final result line of a successful command
pub const FINAL_OK: &str = "OK";
/// Data prompt sent by the modem before it accepts a raw payload
pub const DATA_PROMPT: &str = ">";

/// How a response is considered complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSpec {
    /// Number of lines to collect; 0 means "until a final result code"
    pub line_count: usize,
    /// Upper bound on the whole exchange
    pub timeout: Duration,
}

impl ResponseSpec {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

    pub fn new(line_count: usize, timeout: Duration) -> Self {
        Self {
            line_count,
            timeout,
        }
    }
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_TIMEOUT)
    }
}

/// Lines returned for one command, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtResponse {
    lines: Vec<String>,
}

impl AtResponse {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Whether the final `OK` is present
    pub fn is_ok(&self) -> bool {
        self.lines.iter().any(|l| l == FINAL_OK)
    }

    /// Whether the data prompt was received
    pub fn has_prompt(&self) -> bool {
        self.lines.iter().any(|l| l == DATA_PROMPT)
    }

    /// Body of the first line starting with `prefix` (e.g. `+QMTOPEN:`), trimmed
    pub fn find_prefixed(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|l| l.strip_prefix(prefix))
            .map(str::trim)
    }
}

/// Whether a line terminates a response on its own
pub fn is_final_line(line: &str) -> bool {
    line == FINAL_OK || is_error_line(line)
}

/// Whether a line is a failing final result code
pub fn is_error_line(line: &str) -> bool {
    line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR")
}

/// Execute commands on the modem
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Send one command (line terminator appended) and wait for its response
    ///
    /// A failing final result code is returned as `ProtocolError`, an expired
    /// wait as `TimeoutError`.
    async fn execute(&self, command: &str, spec: ResponseSpec) -> Result<AtResponse>;
}
