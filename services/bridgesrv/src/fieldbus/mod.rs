//! Field-bus master abstraction
//!
//! The bridge talks to the bus only through `FieldBusMaster`: submit a typed
//! request, wait for its completion, then read values out of the shared
//! per-slave register banks. Banks are written by the master's poll tick
//! before the submission completes.

pub mod banks;
pub mod poll;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::modbus::constants::{
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
};

pub use banks::{pack_bits, BankLayout, RegisterBanks};
pub use poll::run_poll_loop;

/// Register table addressed by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl RegisterKind {
    /// Whether values are single bits
    pub fn is_bit(self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::DiscreteInput)
    }

    /// Whether the table accepts writes
    pub fn is_writable(self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::HoldingRegister)
    }

    /// Modbus function code used to read this table
    pub fn read_function(self) -> u8 {
        match self {
            RegisterKind::Coil => FC_READ_COILS,
            RegisterKind::DiscreteInput => FC_READ_DISCRETE_INPUTS,
            RegisterKind::HoldingRegister => FC_READ_HOLDING_REGISTERS,
            RegisterKind::InputRegister => FC_READ_INPUT_REGISTERS,
        }
    }
}

/// Failure reported by the master stack
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterError {
    #[error("No such register")]
    NoRegister,

    #[error("Illegal argument")]
    IllegalArgument,

    #[error("Receive data error")]
    ReceiveData,

    #[error("Timed out")]
    Timeout,

    #[error("Master busy")]
    Busy,

    #[error("Slave exception 0x{0:02X}")]
    Exception(u8),
}

impl MasterError {
    /// Wire result code of this failure
    pub fn code(self) -> u8 {
        match self {
            MasterError::NoRegister => 1,
            MasterError::IllegalArgument => 2,
            MasterError::ReceiveData => 3,
            MasterError::Timeout => 4,
            MasterError::Busy => 5,
            MasterError::Exception(_) => 6,
        }
    }
}

/// How long a submitter waits for its request to complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestTimeout {
    #[default]
    Forever,
    Bounded(Duration),
}

impl RequestTimeout {
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            RequestTimeout::Forever => None,
            RequestTimeout::Bounded(d) => Some(d),
        }
    }
}

/// Accepts `"forever"` or a number of milliseconds
impl<'de> Deserialize<'de> for RequestTimeout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(RequestTimeout::Bounded(Duration::from_millis(ms))),
            Raw::Text(s) if s.eq_ignore_ascii_case("forever") => Ok(RequestTimeout::Forever),
            Raw::Text(s) => s
                .parse::<u64>()
                .map(|ms| RequestTimeout::Bounded(Duration::from_millis(ms)))
                .map_err(|_| {
                    serde::de::Error::custom(format!(
                        "invalid request timeout '{s}', expected \"forever\" or milliseconds"
                    ))
                }),
        }
    }
}

impl Serialize for RequestTimeout {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestTimeout::Forever => serializer.serialize_str("forever"),
            RequestTimeout::Bounded(d) => serializer.serialize_u64(d.as_millis() as u64),
        }
    }
}

/// Payload of a write submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteData {
    /// Coil states packed LSB-first
    Coils(Vec<u8>),
    Registers(Vec<u16>),
}

/// Field-bus master stack
#[async_trait]
pub trait FieldBusMaster: Send + Sync {
    /// Read `count` values starting at `start` into the shared banks
    async fn submit_read(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        count: u16,
        timeout: RequestTimeout,
    ) -> Result<(), MasterError>;

    /// Write `count` values starting at `start`
    async fn submit_write(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        count: u16,
        data: WriteData,
        timeout: RequestTimeout,
    ) -> Result<(), MasterError>;

    /// Shared per-slave register storage
    fn banks(&self) -> &RegisterBanks;

    /// Service at most one queued request
    async fn poll_tick(&self);
}
