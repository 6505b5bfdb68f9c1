//! Modbus PDU buffer
//!
//! Fixed-size stack array, no heap allocation per request.

use tracing::trace;

use super::constants::{EXCEPTION_FLAG, MAX_PDU_SIZE};
use crate::fieldbus::MasterError;

#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, MasterError> {
        if data.len() > MAX_PDU_SIZE {
            return Err(MasterError::ReceiveData);
        }
        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<(), MasterError> {
        if self.len >= MAX_PDU_SIZE {
            return Err(MasterError::IllegalArgument);
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<(), MasterError> {
        let [hi, lo] = value.to_be_bytes();
        self.push(hi)?;
        self.push(lo)
    }

    pub fn extend(&mut self, data: &[u8]) -> Result<(), MasterError> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(MasterError::IllegalArgument);
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    pub fn is_exception(&self) -> bool {
        self.function_code()
            .is_some_and(|fc| fc & EXCEPTION_FLAG != 0)
    }

    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.as_slice().get(1).copied()
        } else {
            None
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent PDU construction
#[derive(Default)]
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl PduBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function_code(mut self, fc: u8) -> Result<Self, MasterError> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    pub fn address(mut self, addr: u16) -> Result<Self, MasterError> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    pub fn quantity(mut self, qty: u16) -> Result<Self, MasterError> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    pub fn byte(mut self, b: u8) -> Result<Self, MasterError> {
        self.pdu.push(b)?;
        Ok(self)
    }

    pub fn data(mut self, data: &[u8]) -> Result<Self, MasterError> {
        self.pdu.extend(data)?;
        Ok(self)
    }

    pub fn build(self) -> ModbusPdu {
        trace!(
            "PDU built: FC={:02X?}, len={}",
            self.pdu.function_code(),
            self.pdu.len()
        );
        self.pdu
    }
}
