//! Error handling for the bridge service
//!
//! One flat error type for the whole crate; field-bus failures keep their own
//! `MasterError` so they can be mapped to wire result codes before they get here.

use errors::{ErrorCategory, ErrorClass};
use thiserror::Error;

use crate::fieldbus::MasterError;

/// Bridge Service Error Type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Command failed, response unexpected or acknowledgement missing
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Inbound request buffer could not be decoded
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Request decoded but names an operation that is not allowed
    #[error("Argument error: {0}")]
    ArgumentError(String),

    /// Field-bus master reported a failure
    #[error("Field-bus error: {0}")]
    FieldBusError(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input/Output operation errors (serial ports, closed links)
    #[error("IO error: {0}")]
    IoError(String),

    /// A bounded wait expired
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Memory or queue capacity could not be obtained
    #[error("Resource error: {0}")]
    ResourceError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the bridge service
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        BridgeError::ProtocolError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        BridgeError::DecodeError(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        BridgeError::ArgumentError(msg.into())
    }

    pub fn fieldbus(msg: impl Into<String>) -> Self {
        BridgeError::FieldBusError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::ConfigError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        BridgeError::IoError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        BridgeError::TimeoutError(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        BridgeError::ResourceError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        BridgeError::InternalError(msg.into())
    }

    pub fn channel_closed() -> Self {
        BridgeError::IoError("Command channel closed".to_string())
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::DecodeError(format!("JSON: {err}"))
    }
}

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        BridgeError::ConfigError(err.to_string())
    }
}

impl From<tokio_serial::Error> for BridgeError {
    fn from(err: tokio_serial::Error) -> Self {
        BridgeError::IoError(format!("Serial: {err}"))
    }
}

impl From<std::collections::TryReserveError> for BridgeError {
    fn from(err: std::collections::TryReserveError) -> Self {
        BridgeError::ResourceError(err.to_string())
    }
}

impl From<MasterError> for BridgeError {
    fn from(err: MasterError) -> Self {
        BridgeError::FieldBusError(err.to_string())
    }
}

// ============================================================================
// Extension trait for adding context to errors
// ============================================================================

/// Extension trait for adding context to errors
pub trait ErrorExt<T> {
    fn config_error(self, msg: &str) -> Result<T>;
    fn protocol_error(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn config_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| BridgeError::ConfigError(format!("{msg}: {e}")))
    }

    fn protocol_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| BridgeError::ProtocolError(format!("{msg}: {e}")))
    }
}

// ============================================================================
// BridgeError implements ErrorClass
// ============================================================================

impl ErrorClass for BridgeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ProtocolError(_) => "BRIDGE_PROTOCOL_ERROR",
            Self::DecodeError(_) => "BRIDGE_DECODE_ERROR",
            Self::ArgumentError(_) => "BRIDGE_ARGUMENT_ERROR",
            Self::FieldBusError(_) => "BRIDGE_FIELDBUS_ERROR",
            Self::ConfigError(_) => "BRIDGE_CONFIG_ERROR",
            Self::IoError(_) => "BRIDGE_IO_ERROR",
            Self::TimeoutError(_) => "BRIDGE_TIMEOUT",
            Self::ResourceError(_) => "BRIDGE_RESOURCE_ERROR",
            Self::InternalError(_) => "BRIDGE_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ProtocolError(_) => ErrorCategory::Protocol,
            Self::DecodeError(_) => ErrorCategory::Decode,
            Self::ArgumentError(_) => ErrorCategory::Validation,
            Self::FieldBusError(_) => ErrorCategory::FieldBus,
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::IoError(_) => ErrorCategory::Io,
            Self::TimeoutError(_) => ErrorCategory::Timeout,
            Self::ResourceError(_) => ErrorCategory::ResourceExhausted,
            Self::InternalError(_) => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::protocol("AT+QMTOPEN rejected");
        assert_eq!(err.to_string(), "Protocol error: AT+QMTOPEN rejected");
    }

    #[test]
    fn test_json_error_is_decode() {
        let err: BridgeError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, BridgeError::DecodeError(_)));
        assert_eq!(err.category(), ErrorCategory::Decode);
    }

    #[test]
    fn test_resource_error_is_fatal() {
        assert!(BridgeError::resource("oom").is_fatal());
        assert!(!BridgeError::decode("bad").is_fatal());
        assert!(BridgeError::timeout("late").is_retryable());
    }

    #[test]
    fn test_error_ext_context() {
        let res: std::result::Result<(), &str> = Err("boom");
        let err = res.protocol_error("open failed").unwrap_err();
        assert_eq!(err, BridgeError::ProtocolError("open failed: boom".into()));
    }
}
