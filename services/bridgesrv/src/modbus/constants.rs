//! Modbus protocol limits and function codes
//!
//! The PDU limit comes from the RS485 ADU of 256 bytes minus the slave
//! address (1) and CRC (2).

pub const MAX_PDU_SIZE: usize = 253;

/// Largest RTU frame: slave address + PDU + CRC
pub const MAX_RTU_FRAME: usize = 1 + MAX_PDU_SIZE + 2;

/// FC03/FC04: 1 + 1 + 2N <= 253
pub const MAX_READ_REGISTERS: u16 = 125;

/// FC16: 1 + 2 + 2 + 1 + 2N <= 253
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// FC01/FC02
pub const MAX_READ_COILS: u16 = 2000;

/// FC15, conservative practical limit (0x7B0)
pub const MAX_WRITE_COILS: u16 = 1968;

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_fit_in_pdu() {
        assert!(1 + 1 + usize::from(MAX_READ_REGISTERS) * 2 <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + usize::from(MAX_WRITE_REGISTERS) * 2 <= MAX_PDU_SIZE);
        assert!(1 + 1 + usize::from(MAX_READ_COILS).div_ceil(8) <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + usize::from(MAX_WRITE_COILS).div_ceil(8) <= MAX_PDU_SIZE);
        assert_eq!(MAX_RTU_FRAME, 256);
    }
}
