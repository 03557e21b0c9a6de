//! Per-core IRQ address match lines
//!
//! Any access the hardware treats as a memory touch (voice fetches, DMA and data port transfers,
//! mixer staging writes) is checked against both cores' IRQ addresses, regardless of which core
//! made the access.

use crate::memory::ADDRESS_MASK;
use bincode::{Decode, Encode};
use spu2_common::num::U32Ext;

const DEFAULT_IRQ_ADDRESS: u32 = 0xFFFF0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct IrqLine {
    enabled: bool,
    address: u32,
    // Readable status flag; stays set until IRQs are disabled for the core
    info: bool,
    // Latched for the host; cleared by take()
    pending: bool,
}

impl Default for IrqLine {
    fn default() -> Self {
        Self { enabled: false, address: DEFAULT_IRQ_ADDRESS, info: false, pending: false }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct IrqLines {
    lines: [IrqLine; 2],
}

impl IrqLines {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn check(&mut self, address: u32) {
        let address = address & ADDRESS_MASK;
        for (core, line) in self.lines.iter_mut().enumerate() {
            if line.enabled && line.address == address {
                if !line.pending {
                    log::debug!("Core {core} IRQ raised at address {address:05X}");
                }
                line.info = true;
                line.pending = true;
            }
        }
    }

    pub fn set_enabled(&mut self, core: usize, enabled: bool) {
        let line = &mut self.lines[core];
        line.enabled = enabled;
        if !enabled {
            line.info = false;
        }
    }

    pub fn address(&self, core: usize) -> u32 {
        self.lines[core].address
    }

    pub fn write_address_high(&mut self, core: usize, value: u16) {
        self.lines[core].address.set_high_word(value & 0x000F);
    }

    pub fn write_address_low(&mut self, core: usize, value: u16) {
        self.lines[core].address.set_low_word(value);
    }

    /// Info flags as read from the SPDIF IRQINFO register.
    pub fn info_bits(&self) -> u16 {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.info)
            .map(|(core, _)| 4_u16 << core)
            .fold(0, |bits, bit| bits | bit)
    }

    /// Return which cores raised an IRQ since the last call, and clear them.
    pub fn take(&mut self) -> [bool; 2] {
        self.lines.each_mut().map(|line| std::mem::take(&mut line.pending))
    }

    pub fn reset_core(&mut self, core: usize) {
        self.lines[core] = IrqLine::default();
    }
}
