//! Sound RAM, the register shadow, and the ADPCM cache that sits in front of sound RAM

use crate::adpcm::{AdpcmCache, CacheStats, DecodedBlock, BLOCK_WORDS};
use crate::api::{Spu2Error, Spu2Result};
use bincode::{Decode, Encode};
use spu2_common::boxedarray::BoxedSampleArray;

/// Sound RAM size in 16-bit words (2 MB)
pub const SOUND_RAM_WORDS: usize = 0x100000;
pub const ADDRESS_MASK: u32 = 0xFFFFF;

/// Everything below this word address is AutoDMA and mixer staging area, rewritten every sample
pub const DYNAMIC_MEMORY_LINE: u32 = 0x2800;

const REGISTER_SHADOW_WORDS: usize = 0x400;

#[derive(Debug, Clone, Encode, Decode)]
pub struct SoundMemory {
    ram: BoxedSampleArray<SOUND_RAM_WORDS>,
    registers: [u16; REGISTER_SHADOW_WORDS],
    cache: AdpcmCache,
}

impl SoundMemory {
    pub fn new() -> Spu2Result<Self> {
        let ram = BoxedSampleArray::try_new().map_err(|_| Spu2Error::Allocation {
            what: "sound RAM",
            bytes: BoxedSampleArray::<SOUND_RAM_WORDS>::size_bytes(),
        })?;
        let cache = AdpcmCache::new().map_err(|_| Spu2Error::Allocation {
            what: "ADPCM cache",
            bytes: AdpcmCache::size_bytes(),
        })?;

        Ok(Self { ram, registers: [0; REGISTER_SHADOW_WORDS], cache })
    }

    #[inline]
    pub fn read(&self, address: u32) -> i16 {
        self.ram[(address & ADDRESS_MASK) as usize]
    }

    /// Write a word and drop any decoded block it belongs to.
    #[inline]
    pub fn write(&mut self, address: u32, value: i16) {
        let address = address & ADDRESS_MASK;
        self.ram[address as usize] = value;
        self.cache.invalidate(address);
    }

    /// Write a word below the dynamic memory line. Blocks there are never cached, so there is
    /// nothing to invalidate.
    #[inline]
    pub fn write_dynamic(&mut self, address: u32, value: i16) {
        debug_assert!(address < DYNAMIC_MEMORY_LINE, "dynamic write at {address:05X}");

        let address = address & ADDRESS_MASK;
        self.ram[address as usize] = value;
        if address >= DYNAMIC_MEMORY_LINE {
            self.cache.invalidate(address);
        }
    }

    /// Copy a run of words into RAM starting at `address`, wrapping at the end of RAM.
    pub fn write_block(&mut self, address: u32, words: &[u16]) {
        let mut address = address & ADDRESS_MASK;
        let mut remaining = words;
        while !remaining.is_empty() {
            let run = remaining.len().min(SOUND_RAM_WORDS - address as usize);
            let (chunk, rest) = remaining.split_at(run);

            for (dst, &src) in self.ram[address as usize..address as usize + run].iter_mut().zip(chunk) {
                *dst = src as i16;
            }
            self.cache.invalidate_range(address, address + run as u32);

            address = (address + run as u32) & ADDRESS_MASK;
            remaining = rest;
        }
    }

    /// Decoded samples for the block containing `address`. See [`AdpcmCache::get_block`].
    pub fn adpcm_block(&mut self, address: u32, prev1: &mut i32, prev2: &mut i32) -> &DecodedBlock {
        self.cache.get_block(&self.ram, address, prev1, prev2)
    }

    /// Loop flags from the header of the block containing `address`.
    #[inline]
    pub fn loop_flags(&self, address: u32) -> u8 {
        let header = self.read(address & !(BLOCK_WORDS - 1));
        ((header as u16) >> 8) as u8
    }

    #[inline]
    pub fn register_shadow(&self, address: u32) -> u16 {
        self.registers[((address & 0x7FF) >> 1) as usize]
    }

    #[inline]
    pub fn set_register_shadow(&mut self, address: u32, value: u16) {
        self.registers[((address & 0x7FF) >> 1) as usize] = value;
    }

    pub fn take_cache_stats(&mut self) -> CacheStats {
        self.cache.take_stats()
    }

    pub fn clear(&mut self) {
        self.ram.fill(0);
        self.registers.fill(0);
        self.cache.invalidate_all();
    }
}
