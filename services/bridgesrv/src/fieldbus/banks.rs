//! Per-slave register storage shared between the master and its callers

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{MasterError, RegisterKind};

/// Table sizes for every slave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankLayout {
    pub slaves: u8,
    pub coils: u16,
    pub discrete_inputs: u16,
    pub holding_registers: u16,
    pub input_registers: u16,
}

impl Default for BankLayout {
    fn default() -> Self {
        Self {
            slaves: 16,
            coils: 64,
            discrete_inputs: 16,
            holding_registers: 100,
            input_registers: 100,
        }
    }
}

impl BankLayout {
    pub fn size_of(&self, kind: RegisterKind) -> u16 {
        match kind {
            RegisterKind::Coil => self.coils,
            RegisterKind::DiscreteInput => self.discrete_inputs,
            RegisterKind::HoldingRegister => self.holding_registers,
            RegisterKind::InputRegister => self.input_registers,
        }
    }
}

#[derive(Debug, Clone)]
struct SlaveBank {
    coils: Vec<u8>,
    discrete_inputs: Vec<u8>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl SlaveBank {
    fn new(layout: &BankLayout) -> Self {
        Self {
            coils: vec![0; usize::from(layout.coils).div_ceil(8)],
            discrete_inputs: vec![0; usize::from(layout.discrete_inputs).div_ceil(8)],
            holding_registers: vec![0; usize::from(layout.holding_registers)],
            input_registers: vec![0; usize::from(layout.input_registers)],
        }
    }

    fn bits(&self, kind: RegisterKind) -> &[u8] {
        match kind {
            RegisterKind::DiscreteInput => &self.discrete_inputs,
            _ => &self.coils,
        }
    }

    fn bits_mut(&mut self, kind: RegisterKind) -> &mut [u8] {
        match kind {
            RegisterKind::DiscreteInput => &mut self.discrete_inputs,
            _ => &mut self.coils,
        }
    }

    fn words(&self, kind: RegisterKind) -> &[u16] {
        match kind {
            RegisterKind::InputRegister => &self.input_registers,
            _ => &self.holding_registers,
        }
    }

    fn words_mut(&mut self, kind: RegisterKind) -> &mut [u16] {
        match kind {
            RegisterKind::InputRegister => &mut self.input_registers,
            _ => &mut self.holding_registers,
        }
    }
}

/// Pack 0/1 values LSB-first into bytes
pub fn pack_bits(values: &[u16]) -> Vec<u8> {
    let mut packed = vec![0u8; values.len().div_ceil(8)];
    for (i, value) in values.iter().enumerate() {
        set_bit(&mut packed, i, *value != 0);
    }
    packed
}

fn bit_at(packed: &[u8], index: usize) -> bool {
    packed
        .get(index / 8)
        .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
}

fn set_bit(packed: &mut [u8], index: usize, value: bool) {
    if let Some(byte) = packed.get_mut(index / 8) {
        if value {
            *byte |= 1 << (index % 8);
        } else {
            *byte &= !(1 << (index % 8));
        }
    }
}

/// Register banks indexed by `(slave - 1, address)`
#[derive(Debug)]
pub struct RegisterBanks {
    layout: BankLayout,
    slaves: RwLock<Vec<SlaveBank>>,
}

impl Default for RegisterBanks {
    fn default() -> Self {
        Self::new(BankLayout::default())
    }
}

impl RegisterBanks {
    pub fn new(layout: BankLayout) -> Self {
        let slaves = (0..layout.slaves).map(|_| SlaveBank::new(&layout)).collect();
        Self {
            layout,
            slaves: RwLock::new(slaves),
        }
    }

    pub fn layout(&self) -> &BankLayout {
        &self.layout
    }

    /// Validate a request range against the layout
    pub fn check_range(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        count: u16,
    ) -> Result<(), MasterError> {
        if count == 0 {
            return Err(MasterError::IllegalArgument);
        }
        if slave == 0 || slave > self.layout.slaves {
            return Err(MasterError::NoRegister);
        }
        let end = u32::from(start) + u32::from(count);
        if end > u32::from(self.layout.size_of(kind)) {
            return Err(MasterError::NoRegister);
        }
        Ok(())
    }

    /// Copy `count` values out; bits are unpacked to 0/1
    pub fn read_values(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, MasterError> {
        self.check_range(kind, slave, start, count)?;
        let slaves = self.slaves.read();
        let bank = &slaves[usize::from(slave - 1)];
        let range = usize::from(start)..usize::from(start) + usize::from(count);

        if kind.is_bit() {
            let packed = bank.bits(kind);
            Ok(range.map(|i| u16::from(bit_at(packed, i))).collect())
        } else {
            Ok(bank.words(kind)[range].to_vec())
        }
    }

    /// Store `count` LSB-first packed bits starting at `start`
    pub fn store_bits(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        count: u16,
        packed: &[u8],
    ) -> Result<(), MasterError> {
        if !kind.is_bit() {
            return Err(MasterError::IllegalArgument);
        }
        self.check_range(kind, slave, start, count)?;
        if packed.len() < usize::from(count).div_ceil(8) {
            return Err(MasterError::ReceiveData);
        }
        let mut slaves = self.slaves.write();
        let bits = slaves[usize::from(slave - 1)].bits_mut(kind);
        for i in 0..usize::from(count) {
            set_bit(bits, usize::from(start) + i, bit_at(packed, i));
        }
        Ok(())
    }

    /// Store register values starting at `start`
    pub fn store_registers(
        &self,
        kind: RegisterKind,
        slave: u8,
        start: u16,
        values: &[u16],
    ) -> Result<(), MasterError> {
        if kind.is_bit() {
            return Err(MasterError::IllegalArgument);
        }
        let count = u16::try_from(values.len()).map_err(|_| MasterError::IllegalArgument)?;
        self.check_range(kind, slave, start, count)?;
        let mut slaves = self.slaves.write();
        let words = slaves[usize::from(slave - 1)].words_mut(kind);
        let begin = usize::from(start);
        words[begin..begin + values.len()].copy_from_slice(values);
        Ok(())
    }
}
