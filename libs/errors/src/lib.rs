//! Shared error classification for the gateway services
//!
//! Service crates keep their own `thiserror` enums; this crate gives them a
//! common vocabulary (category, stable code, retry policy) so the runtime can
//! decide what to retry and how loudly to log without matching on every
//! service-specific variant.

use serde::{Deserialize, Serialize};

// ============================================================================
// ErrorCategory
// ============================================================================

/// Coarse classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Io,
    Timeout,

    // Link layer (modem command channel, broker session)
    Protocol,
    Connection,

    // Message layer
    Decode,
    Validation,

    // Field-bus layer
    FieldBus,

    // System level
    ResourceBusy,
    ResourceExhausted,
    Internal,
}

// ============================================================================
// ErrorClass trait
// ============================================================================

/// Classification implemented by every service error type
pub trait ErrorClass: std::error::Error + Send + Sync + 'static {
    /// Stable error code (for logs and monitoring)
    fn error_code(&self) -> &'static str;

    /// Error category
    fn category(&self) -> ErrorCategory;

    /// Whether retrying the same operation can succeed
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Timeout
                | ErrorCategory::Protocol
                | ErrorCategory::Connection
                | ErrorCategory::ResourceBusy
        )
    }

    /// Recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> u64 {
        match self.category() {
            ErrorCategory::Timeout => 500,
            ErrorCategory::Protocol => 1000,
            ErrorCategory::Connection => 1500,
            ErrorCategory::ResourceBusy => 2000,
            _ => 0,
        }
    }

    /// Log level the error should be reported at
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::ResourceExhausted => Level::ERROR,
            ErrorCategory::Decode | ErrorCategory::Validation => Level::INFO,
            _ => Level::WARN,
        }
    }

    /// Whether the failure should stop the owning task instead of being absorbed
    fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::ResourceExhausted)
    }

    /// Structured snapshot for logging
    fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.error_code(),
            category: self.category(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

// ============================================================================
// ErrorReport
// ============================================================================

/// Serializable description of an error
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
}

impl ErrorReport {
    /// Render as a single-line JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"code\":\"{}\"}}", self.code))
    }
}

/// Emit an error through `tracing` at the level its class asks for
pub fn log_error<E: ErrorClass>(context: &str, err: &E) {
    let report = err.report();
    match err.log_level() {
        tracing::Level::ERROR => tracing::error!("{}: {}", context, report.to_json()),
        tracing::Level::WARN => tracing::warn!("{}: {}", context, report.to_json()),
        tracing::Level::INFO => tracing::info!("{}: {}", context, report.to_json()),
        _ => tracing::debug!("{}: {}", context, report.to_json()),
    }
}
