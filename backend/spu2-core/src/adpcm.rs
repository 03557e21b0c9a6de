//! ADPCM block decoding and the cache of decoded blocks
//!
//! A block is 8 words: a header word (shift in bits 0-3, filter in bits 4-7, loop flags in the
//! high byte) followed by 14 data bytes that hold 28 4-bit samples, low nibble first.

use crate::memory::{ADDRESS_MASK, DYNAMIC_MEMORY_LINE, SOUND_RAM_WORDS};
use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};
use spu2_common::num::I32Ext;
use std::array;
use std::collections::TryReserveError;

pub const BLOCK_WORDS: u32 = 8;
pub const BLOCK_SAMPLES: usize = 28;

const CACHE_LEN: usize = SOUND_RAM_WORDS / BLOCK_WORDS as usize;

pub const LOOP_END: u8 = 1 << 0;
pub const LOOP_REPEAT: u8 = 1 << 1;
pub const LOOP_START: u8 = 1 << 2;

// Only filters 0-4 exist; the rest decode with no prediction
const FILTER_COEFFICIENTS: [(i32, i32); 16] = [
    (0, 0),
    (60, 0),
    (115, -52),
    (98, -55),
    (122, -60),
    (0, 0),
    (0, 0),
    (0, 0),
    (0, 0),
    (0, 0),
    (0, 0),
    (0, 0),
    (0, 0),
    (0, 0),
    (0, 0),
    (0, 0),
];

pub type DecodedBlock = [i16; BLOCK_SAMPLES];

/// Decode one block, updating the two-sample decoder history in place.
#[must_use]
pub fn decode_block(block: &[i16; BLOCK_WORDS as usize], prev1: &mut i32, prev2: &mut i32) -> DecodedBlock {
    let header = block[0] as u16;
    let shift = u32::from(header & 0x0F) + 16;
    let (c1, c2) = FILTER_COEFFICIENTS[usize::from((header >> 4) & 0x0F)];

    let mut samples = [0; BLOCK_SAMPLES];
    let data_bytes = block[1..].iter().flat_map(|&word| (word as u16).to_le_bytes());
    for (i, byte) in data_bytes.enumerate() {
        for (j, nibble) in [byte << 4, byte & 0xF0].into_iter().enumerate() {
            // Place the nibble in the top 4 bits so that the arithmetic shift sign-extends it
            let data = i32::from(nibble as i8) << 24;
            let prediction = (c1 * *prev1 + c2 * *prev2 + 32) >> 6;
            let sample = ((data >> shift) + prediction).clamp_to_i16();

            samples[2 * i + j] = sample;
            *prev2 = *prev1;
            *prev1 = sample.into();
        }
    }

    samples
}

/// Counters wrap; they are only drained when periodic stats logging is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    /// Fetches from the dynamic area, which are always decoded and never cached
    pub ignores: u32,
}

#[derive(Debug, Clone, Copy)]
struct CacheLine {
    validated: bool,
    samples: DecodedBlock,
}

impl CacheLine {
    const EMPTY: Self = Self { validated: false, samples: [0; BLOCK_SAMPLES] };
}

/// Decoded blocks for the whole of sound RAM, indexed by `address / 8`.
///
/// Not persisted in save states; a freshly decoded cache is entirely invalid and refills on demand.
#[derive(Debug, Clone)]
pub struct AdpcmCache {
    lines: Box<[CacheLine]>,
    stats: CacheStats,
}

impl AdpcmCache {
    /// # Errors
    ///
    /// Returns an error if the cache table cannot be allocated.
    pub fn new() -> Result<Self, TryReserveError> {
        let mut lines = Vec::new();
        lines.try_reserve_exact(CACHE_LEN)?;
        lines.resize(CACHE_LEN, CacheLine::EMPTY);

        Ok(Self { lines: lines.into_boxed_slice(), stats: CacheStats::default() })
    }

    pub const fn size_bytes() -> usize {
        CACHE_LEN * size_of::<CacheLine>()
    }

    /// Return the decoded samples for the block containing `address`.
    ///
    /// On a hit the decoder history is taken from the last two cached samples so that a following
    /// miss continues seamlessly.
    pub fn get_block(
        &mut self,
        ram: &[i16; SOUND_RAM_WORDS],
        address: u32,
        prev1: &mut i32,
        prev2: &mut i32,
    ) -> &DecodedBlock {
        let address = address & ADDRESS_MASK;
        let line = &mut self.lines[(address / BLOCK_WORDS) as usize];

        if line.validated {
            self.stats.hits = self.stats.hits.wrapping_add(1);
            *prev1 = line.samples[BLOCK_SAMPLES - 1].into();
            *prev2 = line.samples[BLOCK_SAMPLES - 2].into();
            return &line.samples;
        }

        let block_start = (address & !(BLOCK_WORDS - 1)) as usize;
        let block: [i16; BLOCK_WORDS as usize] = array::from_fn(|i| ram[block_start + i]);
        line.samples = decode_block(&block, prev1, prev2);

        // The dynamic area is rewritten every sample by the mixer and AutoDMA
        if address >= DYNAMIC_MEMORY_LINE {
            line.validated = true;
            self.stats.misses = self.stats.misses.wrapping_add(1);
        } else {
            self.stats.ignores = self.stats.ignores.wrapping_add(1);
        }

        &line.samples
    }

    /// Invalidate the block containing a single word.
    pub fn invalidate(&mut self, address: u32) {
        self.lines[((address & ADDRESS_MASK) / BLOCK_WORDS) as usize].validated = false;
    }

    /// Invalidate every block that overlaps the word range `[start, end)`.
    pub fn invalidate_range(&mut self, start: u32, end: u32) {
        let start = start & ADDRESS_MASK;
        if end <= start {
            return;
        }

        let first = (start / BLOCK_WORDS) as usize;
        let last = (((end - 1) / BLOCK_WORDS) as usize).min(CACHE_LEN - 1);
        for line in &mut self.lines[first..=last] {
            line.validated = false;
        }
    }

    pub fn invalidate_all(&mut self) {
        for line in &mut self.lines {
            line.validated = false;
        }
    }

    pub fn take_stats(&mut self) -> CacheStats {
        std::mem::take(&mut self.stats)
    }
}

impl Encode for AdpcmCache {
    fn encode<E: Encoder>(&self, _encoder: &mut E) -> Result<(), EncodeError> {
        Ok(())
    }
}

impl<Context> Decode<Context> for AdpcmCache {
    fn decode<D: Decoder<Context = Context>>(_decoder: &mut D) -> Result<Self, DecodeError> {
        Self::new().map_err(|_| DecodeError::Other("unable to allocate ADPCM cache"))
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for AdpcmCache {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        _decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Self::new().map_err(|_| DecodeError::Other("unable to allocate ADPCM cache"))
    }
}
