//! Serial port settings and opening (modem and field-bus lines)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, error};

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    /// "none", "even" or "odd"
    pub parity: String,
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: "none".to_string(),
            timeout_ms: 1000,
        }
    }
}

impl SerialSettings {
    pub fn data_bits(&self) -> Result<DataBits> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(BridgeError::config(format!("Invalid data bits: {}", other))),
        }
    }

    pub fn stop_bits(&self) -> Result<StopBits> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(BridgeError::config(format!("Invalid stop bits: {}", other))),
        }
    }

    pub fn parity(&self) -> Result<Parity> {
        match self.parity.to_ascii_lowercase().as_str() {
            "none" => Ok(Parity::None),
            "even" => Ok(Parity::Even),
            "odd" => Ok(Parity::Odd),
            other => Err(BridgeError::config(format!("Invalid parity: {}", other))),
        }
    }

    pub fn validate(&self, section: &str) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(BridgeError::config(format!("{section}.device is empty")));
        }
        if self.baud_rate == 0 {
            return Err(BridgeError::config(format!("{section}.baud_rate must be > 0")));
        }
        self.data_bits()?;
        self.stop_bits()?;
        self.parity()?;
        Ok(())
    }
}

pub fn open_serial(settings: &SerialSettings) -> Result<SerialStream> {
    debug!(
        "Opening serial port {} at {} baud",
        settings.device, settings.baud_rate
    );
    tokio_serial::new(&settings.device, settings.baud_rate)
        .data_bits(settings.data_bits()?)
        .stop_bits(settings.stop_bits()?)
        .parity(settings.parity()?)
        .timeout(Duration::from_millis(settings.timeout_ms))
        .open_native_async()
        .map_err(|e| {
            error!("Failed to open serial port {}: {}", settings.device, e);
            BridgeError::io(format!("Serial port {}: {}", settings.device, e))
        })
}
