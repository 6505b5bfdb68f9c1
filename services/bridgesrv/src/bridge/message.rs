//! Bridge request/result wire format
//!
//! Request: `{"slaveAddr":1,"func":3,"regStart":2,"regNum":2,"rw":0,"data":[10,20]}`
//! (`rw` 0 = write, 1 = read). Result: `{"func":3,"code":0}`, with `data` on
//! successful reads.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};
use crate::fieldbus::{MasterError, RegisterKind};

pub const MAX_SLAVE_ADDR: u8 = 247;
pub const MAX_COUNT: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    CoilsRw = 1,
    DiscreteInputsR = 2,
    HoldingRegistersRw = 3,
    InputRegistersR = 4,
}

impl FunctionCode {
    pub fn from_wire(raw: u64) -> Option<Self> {
        match raw {
            1 => Some(FunctionCode::CoilsRw),
            2 => Some(FunctionCode::DiscreteInputsR),
            3 => Some(FunctionCode::HoldingRegistersRw),
            4 => Some(FunctionCode::InputRegistersR),
            _ => None,
        }
    }

    pub fn as_wire(self) -> u8 {
        self as u8
    }

    pub fn register_kind(self) -> RegisterKind {
        match self {
            FunctionCode::CoilsRw => RegisterKind::Coil,
            FunctionCode::DiscreteInputsR => RegisterKind::DiscreteInput,
            FunctionCode::HoldingRegistersRw => RegisterKind::HoldingRegister,
            FunctionCode::InputRegistersR => RegisterKind::InputRegister,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

impl Direction {
    pub fn from_wire(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Direction::Write),
            1 => Some(Direction::Read),
            _ => None,
        }
    }
}

/// One decoded field-bus request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    pub slave: u8,
    pub function: FunctionCode,
    pub start: u16,
    pub count: u16,
    pub direction: Direction,
    /// Exactly `count` values for writes, `None` for reads
    pub data: Option<Vec<u16>>,
}

fn required_u64(obj: &Map<String, Value>, key: &str) -> Result<u64> {
    match obj.get(key) {
        None => Err(BridgeError::decode(format!("missing field '{key}'"))),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| BridgeError::decode(format!("field '{key}' is not an unsigned integer"))),
    }
}

impl BridgeRequest {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(buf)?;
        let obj = value
            .as_object()
            .ok_or_else(|| BridgeError::decode("request is not a JSON object"))?;

        let slave = required_u64(obj, "slaveAddr")?;
        if slave == 0 || slave > u64::from(MAX_SLAVE_ADDR) {
            return Err(BridgeError::decode(format!("slaveAddr {slave} out of range")));
        }
        let raw_func = required_u64(obj, "func")?;
        let function = FunctionCode::from_wire(raw_func)
            .ok_or_else(|| BridgeError::decode(format!("unknown func {raw_func}")))?;
        let start = required_u64(obj, "regStart")?;
        let start = u16::try_from(start)
            .map_err(|_| BridgeError::decode(format!("regStart {start} out of range")))?;
        let count = required_u64(obj, "regNum")?;
        if count == 0 || count > u64::from(MAX_COUNT) {
            return Err(BridgeError::decode(format!("regNum {count} not in 1..{MAX_COUNT}")));
        }
        let count = count as u16;
        if u32::from(start) + u32::from(count) > 0x1_0000 {
            return Err(BridgeError::decode("register range exceeds address space"));
        }
        let raw_rw = required_u64(obj, "rw")?;
        let direction = Direction::from_wire(raw_rw)
            .ok_or_else(|| BridgeError::decode(format!("unknown rw {raw_rw}")))?;

        // Writes to read-only tables carry no usable data; the pump rejects them
        let data = match direction {
            Direction::Write if function.register_kind().is_writable() => {
                Some(Self::decode_data(obj, function, count)?)
            },
            _ => None,
        };

        Ok(Self {
            slave: slave as u8,
            function,
            start,
            count,
            direction,
            data,
        })
    }

    /// First `count` elements of `data`, range-checked for the register width
    fn decode_data(
        obj: &Map<String, Value>,
        function: FunctionCode,
        count: u16,
    ) -> Result<Vec<u16>> {
        let items = obj
            .get("data")
            .ok_or_else(|| BridgeError::decode("missing field 'data'"))?
            .as_array()
            .ok_or_else(|| BridgeError::decode("field 'data' is not an array"))?;
        let count = usize::from(count);
        if items.len() < count {
            return Err(BridgeError::decode(format!(
                "data has {} elements, regNum is {}",
                items.len(),
                count
            )));
        }

        let bits = function.register_kind().is_bit();
        let mut values = Vec::new();
        values.try_reserve_exact(count)?;
        for (i, item) in items.iter().take(count).enumerate() {
            let v = item
                .as_u64()
                .filter(|v| *v <= u64::from(u16::MAX))
                .ok_or_else(|| BridgeError::decode(format!("data[{i}] out of range: {item}")))?;
            // Any non-zero coil value switches the coil on
            values.push(if bits { u16::from(v != 0) } else { v as u16 });
        }
        Ok(values)
    }
}

/// Wire result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success = 0,
    NoRegister = 1,
    IllegalArgument = 2,
    ReceiveData = 3,
    Timeout = 4,
    Busy = 5,
    SlaveException = 6,
}

impl ResultCode {
    pub fn as_wire(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl From<MasterError> for ResultCode {
    fn from(err: MasterError) -> Self {
        match err {
            MasterError::NoRegister => ResultCode::NoRegister,
            MasterError::IllegalArgument => ResultCode::IllegalArgument,
            MasterError::ReceiveData => ResultCode::ReceiveData,
            MasterError::Timeout => ResultCode::Timeout,
            MasterError::Busy => ResultCode::Busy,
            MasterError::Exception(_) => ResultCode::SlaveException,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeResult {
    pub function: FunctionCode,
    pub code: ResultCode,
    pub data: Option<Vec<u16>>,
}

#[derive(Serialize)]
struct WireResult<'a> {
    func: u8,
    code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a [u16]>,
}

impl BridgeResult {
    pub fn without_data(function: FunctionCode, code: ResultCode) -> Self {
        Self {
            function,
            code,
            data: None,
        }
    }

    /// Serialize into `buf` (cleared first); fails if longer than `max_len`
    pub fn encode_into(&self, buf: &mut Vec<u8>, max_len: usize) -> Result<()> {
        buf.clear();
        let wire = WireResult {
            func: self.function.as_wire(),
            code: self.code.as_wire(),
            data: self.data.as_deref(),
        };
        serde_json::to_writer(&mut *buf, &wire)
            .map_err(|e| BridgeError::protocol(format!("Failed to encode result: {e}")))?;
        if buf.len() > max_len {
            let len = buf.len();
            buf.clear();
            return Err(BridgeError::protocol(format!(
                "Encoded result is {len} bytes, limit {max_len}"
            )));
        }
        Ok(())
    }
}
