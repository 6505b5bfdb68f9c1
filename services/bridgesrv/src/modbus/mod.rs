//! Reference Modbus RTU master

pub mod codec;
pub mod constants;
pub mod master;
pub mod pdu;

pub use master::RtuMaster;
pub use pdu::{ModbusPdu, PduBuilder};
