//! Modbus RTU request/response codec
//!
//! Request PDUs for FC01/02/03/04/15/16, RTU framing with CRC-16/MODBUS and
//! response validation.

use crc::{Crc, CRC_16_MODBUS};

use super::constants::*;
use super::pdu::{ModbusPdu, PduBuilder};
use crate::fieldbus::{MasterError, RegisterKind};

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Payload of a successful read response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPayload {
    /// Packed LSB-first
    Bits(Vec<u8>),
    Registers(Vec<u16>),
}

pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// `[slave] + PDU + [crc lo, crc hi]`
pub fn frame_rtu(slave: u8, pdu: &ModbusPdu) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
    frame.push(slave);
    frame.extend_from_slice(pdu.as_slice());
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Check address and CRC of a received frame; returns its PDU
pub fn unframe_rtu(slave: u8, frame: &[u8]) -> Result<ModbusPdu, MasterError> {
    if frame.len() < 4 {
        return Err(MasterError::ReceiveData);
    }
    let (body, crc) = frame.split_at(frame.len() - 2);
    if crc16(body).to_le_bytes() != [crc[0], crc[1]] {
        return Err(MasterError::ReceiveData);
    }
    if body[0] != slave {
        return Err(MasterError::ReceiveData);
    }
    ModbusPdu::from_slice(&body[1..])
}

pub fn build_read_request(
    kind: RegisterKind,
    start: u16,
    count: u16,
) -> Result<ModbusPdu, MasterError> {
    let max = if kind.is_bit() {
        MAX_READ_COILS
    } else {
        MAX_READ_REGISTERS
    };
    if count == 0 || count > max {
        return Err(MasterError::IllegalArgument);
    }
    Ok(PduBuilder::new()
        .function_code(kind.read_function())?
        .address(start)?
        .quantity(count)?
        .build())
}

/// FC15 with coil states already packed LSB-first
pub fn build_write_coils(start: u16, count: u16, packed: &[u8]) -> Result<ModbusPdu, MasterError> {
    let byte_count = usize::from(count).div_ceil(8);
    if count == 0 || count > MAX_WRITE_COILS || packed.len() < byte_count {
        return Err(MasterError::IllegalArgument);
    }
    Ok(PduBuilder::new()
        .function_code(FC_WRITE_MULTIPLE_COILS)?
        .address(start)?
        .quantity(count)?
        .byte(byte_count as u8)?
        .data(&packed[..byte_count])?
        .build())
}

/// FC16
pub fn build_write_registers(start: u16, values: &[u16]) -> Result<ModbusPdu, MasterError> {
    let count = u16::try_from(values.len()).map_err(|_| MasterError::IllegalArgument)?;
    if count == 0 || count > MAX_WRITE_REGISTERS {
        return Err(MasterError::IllegalArgument);
    }
    let mut pdu = PduBuilder::new()
        .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
        .address(start)?
        .quantity(count)?
        .byte((values.len() * 2) as u8)?
        .build();
    for &value in values {
        pdu.push_u16(value)?;
    }
    Ok(pdu)
}

fn check_function(pdu: &ModbusPdu, expected_fc: u8) -> Result<(), MasterError> {
    match pdu.function_code() {
        None => Err(MasterError::ReceiveData),
        Some(fc) if fc == expected_fc | EXCEPTION_FLAG => {
            Err(MasterError::Exception(pdu.exception_code().unwrap_or(0)))
        },
        Some(fc) if fc != expected_fc => Err(MasterError::ReceiveData),
        Some(_) => Ok(()),
    }
}

pub fn parse_read_response(
    pdu: &ModbusPdu,
    kind: RegisterKind,
    count: u16,
) -> Result<ReadPayload, MasterError> {
    check_function(pdu, kind.read_function())?;
    let data = pdu.as_slice();
    let byte_count = usize::from(*data.get(1).ok_or(MasterError::ReceiveData)?);
    let body = data.get(2..2 + byte_count).ok_or(MasterError::ReceiveData)?;

    if kind.is_bit() {
        if byte_count < usize::from(count).div_ceil(8) {
            return Err(MasterError::ReceiveData);
        }
        Ok(ReadPayload::Bits(body.to_vec()))
    } else {
        if byte_count != usize::from(count) * 2 {
            return Err(MasterError::ReceiveData);
        }
        Ok(ReadPayload::Registers(
            body.chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect(),
        ))
    }
}

/// FC15/FC16 responses echo the start address and quantity
pub fn parse_write_response(
    pdu: &ModbusPdu,
    expected_fc: u8,
    start: u16,
    count: u16,
) -> Result<(), MasterError> {
    check_function(pdu, expected_fc)?;
    let data = pdu.as_slice();
    if data.len() < 5 {
        return Err(MasterError::ReceiveData);
    }
    let echoed_start = u16::from_be_bytes([data[1], data[2]]);
    let echoed_count = u16::from_be_bytes([data[3], data[4]]);
    if echoed_start != start || echoed_count != count {
        return Err(MasterError::ReceiveData);
    }
    Ok(())
}
