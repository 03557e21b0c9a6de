//! Per-core reverb unit
//!
//! The work area is a ring buffer inside sound RAM between ESA and EEA. The unit runs at half the
//! output rate: even ticks latch the input and repeat the previous output, odd ticks run the
//! filter network on the average of the two latched inputs.

use crate::memory::{ADDRESS_MASK, SoundMemory};
use bincode::{Decode, Encode};
use spu2_common::num::{I32Ext, U32Ext};

/// Work area offsets, in register order starting at 0x2E4
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverbOffset {
    FbSrcA,
    FbSrcB,
    IirDestA0,
    IirDestA1,
    AccSrcA0,
    AccSrcA1,
    AccSrcB0,
    AccSrcB1,
    IirSrcA0,
    IirSrcA1,
    IirDestB0,
    IirDestB1,
    AccSrcC0,
    AccSrcC1,
    AccSrcD0,
    AccSrcD1,
    IirSrcB0,
    IirSrcB1,
    MixDestA0,
    MixDestA1,
    MixDestB0,
    MixDestB1,
}

impl ReverbOffset {
    pub const ALL: [Self; 22] = [
        Self::FbSrcA,
        Self::FbSrcB,
        Self::IirDestA0,
        Self::IirDestA1,
        Self::AccSrcA0,
        Self::AccSrcA1,
        Self::AccSrcB0,
        Self::AccSrcB1,
        Self::IirSrcA0,
        Self::IirSrcA1,
        Self::IirDestB0,
        Self::IirDestB1,
        Self::AccSrcC0,
        Self::AccSrcC1,
        Self::AccSrcD0,
        Self::AccSrcD1,
        Self::IirSrcB0,
        Self::IirSrcB1,
        Self::MixDestA0,
        Self::MixDestA1,
        Self::MixDestB0,
        Self::MixDestB1,
    ];
}

/// Signed coefficients, in register order starting at 0x774
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverbCoefficient {
    IirAlpha,
    AccCoefA,
    AccCoefB,
    AccCoefC,
    AccCoefD,
    IirCoef,
    FbAlpha,
    FbX,
    InCoefL,
    InCoefR,
}

impl ReverbCoefficient {
    pub const ALL: [Self; 10] = [
        Self::IirAlpha,
        Self::AccCoefA,
        Self::AccCoefB,
        Self::AccCoefC,
        Self::AccCoefD,
        Self::IirCoef,
        Self::FbAlpha,
        Self::FbX,
        Self::InCoefL,
        Self::InCoefR,
    ];
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct ReverbUnit {
    start: u32,
    end: u32,
    cursor: u32,
    offsets: [u32; 22],
    coefficients: [i16; 10],
    pending_input: (i32, i32),
    last_output: (i32, i32),
}

impl ReverbUnit {
    pub fn new(core: usize) -> Self {
        let (start, end) = if core == 0 { (0xFFFF8, 0xFFFFF) } else { (0xEFFF8, 0xEFFFF) };
        Self {
            start,
            end,
            cursor: 0,
            offsets: [0; 22],
            coefficients: [0; 10],
            pending_input: (0, 0),
            last_output: (0, 0),
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn write_start_high(&mut self, value: u16) {
        self.start.set_high_word(value & 0x000F);
        self.cursor = 0;
    }

    pub fn write_start_low(&mut self, value: u16) {
        self.start.set_low_word(value);
        self.cursor = 0;
    }

    /// EEA only holds the high bits; the low word is always 0xFFFF.
    pub fn write_end(&mut self, value: u16) {
        self.end = (u32::from(value & 0x000F) << 16) | 0xFFFF;
        self.cursor = 0;
    }

    pub fn offset(&self, offset: ReverbOffset) -> u32 {
        self.offsets[offset as usize]
    }

    pub fn write_offset_high(&mut self, offset: ReverbOffset, value: u16) {
        self.offsets[offset as usize].set_high_word(value & 0x000F);
    }

    pub fn write_offset_low(&mut self, offset: ReverbOffset, value: u16) {
        self.offsets[offset as usize].set_low_word(value);
    }

    pub fn coefficient(&self, coefficient: ReverbCoefficient) -> i16 {
        self.coefficients[coefficient as usize]
    }

    pub fn write_coefficient(&mut self, coefficient: ReverbCoefficient, value: u16) {
        self.coefficients[coefficient as usize] = value as i16;
    }

    // ESA and EEA are masked to 20 bits on write, so the normalized area always fits in RAM
    fn normalize_bounds(&mut self) -> u32 {
        if self.start > self.end {
            std::mem::swap(&mut self.start, &mut self.end);
        }
        debug_assert!(self.end <= ADDRESS_MASK, "work area end {:X}", self.end);
        self.end - self.start + 1
    }

    /// Step the work area cursor. Runs on odd ticks whenever effects are enabled, even if the
    /// core's effects enable bit is clear.
    pub fn advance(&mut self, odd_tick: bool) {
        if !odd_tick {
            return;
        }

        let len = self.normalize_bounds();
        self.cursor = (self.cursor + 1) % len;
    }

    pub fn process(&mut self, memory: &mut SoundMemory, input: (i32, i32), odd_tick: bool) -> (i32, i32) {
        if !odd_tick {
            self.pending_input = input;
            return self.last_output;
        }

        let len = self.normalize_bounds();
        // Games may shrink the buffer after writing offsets, so the cursor can be stale
        self.cursor %= len;

        let input_l = i64::from(((self.pending_input.0 + input.0) >> 1).clamp_to_i16());
        let input_r = i64::from(((self.pending_input.1 + input.1) >> 1).clamp_to_i16());

        let mut ring = RingView { memory, start: self.start, len, cursor: self.cursor };
        let offset = |offset: ReverbOffset| i64::from(self.offsets[offset as usize]);
        let coef = |coefficient: ReverbCoefficient| i64::from(self.coefficients[coefficient as usize]);

        let iir_alpha = coef(ReverbCoefficient::IirAlpha);
        let iir_alpha_complement = i64::from(self.coefficient(ReverbCoefficient::IirAlpha) ^ i16::MIN);
        let iir_coef = coef(ReverbCoefficient::IirCoef);
        let in_coef_l = coef(ReverbCoefficient::InCoefL);
        let in_coef_r = coef(ReverbCoefficient::InCoefR);

        // IIR stages, each writing one sample ahead of its read position
        for (src, dest, input, in_coef) in [
            (ReverbOffset::IirSrcA0, ReverbOffset::IirDestA0, input_l, in_coef_l),
            (ReverbOffset::IirSrcA1, ReverbOffset::IirDestA1, input_r, in_coef_r),
            (ReverbOffset::IirSrcB0, ReverbOffset::IirDestB0, input_l, in_coef_l),
            (ReverbOffset::IirSrcB1, ReverbOffset::IirDestB1, input_r, in_coef_r),
        ] {
            let iir_input = (ring.read(offset(src)) * iir_coef + input * in_coef) >> 16;
            let iir = (iir_input * iir_alpha + ring.read(offset(dest)) * iir_alpha_complement) >> 16;
            ring.write(offset(dest) + 1, iir);
        }

        let acc_coefs = [
            coef(ReverbCoefficient::AccCoefA),
            coef(ReverbCoefficient::AccCoefB),
            coef(ReverbCoefficient::AccCoefC),
            coef(ReverbCoefficient::AccCoefD),
        ];
        let fb_alpha = coef(ReverbCoefficient::FbAlpha);
        let fb_alpha_complement = i64::from(self.coefficient(ReverbCoefficient::FbAlpha) ^ i16::MIN);
        let fb_x = coef(ReverbCoefficient::FbX);

        for (acc_srcs, mix_a, mix_b) in [
            (
                [ReverbOffset::AccSrcA0, ReverbOffset::AccSrcB0, ReverbOffset::AccSrcC0, ReverbOffset::AccSrcD0],
                ReverbOffset::MixDestA0,
                ReverbOffset::MixDestB0,
            ),
            (
                [ReverbOffset::AccSrcA1, ReverbOffset::AccSrcB1, ReverbOffset::AccSrcC1, ReverbOffset::AccSrcD1],
                ReverbOffset::MixDestA1,
                ReverbOffset::MixDestB1,
            ),
        ] {
            let acc = acc_srcs
                .into_iter()
                .zip(acc_coefs)
                .map(|(src, coef)| ring.read(offset(src)) * coef)
                .sum::<i64>()
                >> 16;

            let fb_a = ring.read(offset(mix_a) - offset(ReverbOffset::FbSrcA));
            let fb_b = ring.read(offset(mix_b) - offset(ReverbOffset::FbSrcB));

            ring.write(offset(mix_a), acc - ((fb_a * fb_alpha) >> 16));
            ring.write(
                offset(mix_b),
                ((fb_alpha * acc) >> 16) - ((fb_a * fb_alpha_complement) >> 16) - ((fb_b * fb_x) >> 16),
            );
        }

        let output_l = ring.read(offset(ReverbOffset::MixDestA0)) + ring.read(offset(ReverbOffset::MixDestB0));
        let output_r = ring.read(offset(ReverbOffset::MixDestA1)) + ring.read(offset(ReverbOffset::MixDestB1));

        self.last_output = (output_l.clamp_to_i16().into(), output_r.clamp_to_i16().into());
        self.last_output
    }
}

// Work area accessor relative to the cursor; wraps with the current buffer length on every access
struct RingView<'a> {
    memory: &'a mut SoundMemory,
    start: u32,
    len: u32,
    cursor: u32,
}

impl RingView<'_> {
    fn address(&self, offset: i64) -> u32 {
        let position = (i64::from(self.cursor) + offset).rem_euclid(i64::from(self.len));
        (self.start + position as u32) & ADDRESS_MASK
    }

    fn read(&self, offset: i64) -> i64 {
        self.memory.read(self.address(offset)).into()
    }

    fn write(&mut self, offset: i64, value: i64) {
        let address = self.address(offset);
        self.memory.write(address, value.clamp_to_i16());
    }
}
