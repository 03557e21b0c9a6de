//! A single SPU2 voice: ADPCM sample fetch, pitch stepping, interpolation, and envelope

mod envelope;
mod interpolate;

use crate::adpcm::{BLOCK_SAMPLES, DecodedBlock, LOOP_END, LOOP_REPEAT, LOOP_START};
use crate::irq::IrqLines;
use crate::memory::{ADDRESS_MASK, DYNAMIC_MEMORY_LINE, SoundMemory};
use crate::noise::NoiseGenerator;
use crate::volume::{StereoVolume, apply_volume, mul_shr32};
use bincode::{Decode, Encode};
use spu2_common::num::U32Ext;
use spu2_config::InterpolationMode;

pub use envelope::{Adsr, EnvelopePhase};

// 1.0 in the 0.12 fixed-point sample position
const SAMPLE_STEP: i32 = 4096;

const MAX_PITCH: i32 = 0x3FFF;

/// Shared state a voice needs while it is being clocked.
pub struct MixContext<'a> {
    pub memory: &'a mut SoundMemory,
    pub irq: &'a mut IrqLines,
    pub noise: &'a mut NoiseGenerator,
    pub interpolation: InterpolationMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceAddress {
    Start,
    LoopStart,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceSample {
    pub left: i32,
    pub right: i32,
    /// Post-envelope crest output, also used as the next voice's pitch modulation source
    pub raw: i32,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Voice {
    pub volume: StereoVolume,
    pub adsr: Adsr,
    pitch: u16,
    pub modulated: bool,
    pub noise: bool,
    start_address: u32,
    loop_start_address: u32,
    next_address: u32,
    // Set by host writes to LSAX; block loop-start flags are ignored until the next key on
    loop_locked: bool,
    loop_flags: u8,
    sample_position: i32,
    block_position: usize,
    block: DecodedBlock,
    prev1: i32,
    prev2: i32,
    // Newest sample first
    history: [i32; 4],
    next_crest: i32,
    out_x: i32,
    end_flag: bool,
}

impl Voice {
    pub fn new() -> Self {
        Self {
            volume: StereoVolume::default(),
            adsr: Adsr::default(),
            pitch: MAX_PITCH as u16,
            modulated: false,
            noise: false,
            start_address: DYNAMIC_MEMORY_LINE,
            loop_start_address: DYNAMIC_MEMORY_LINE,
            next_address: DYNAMIC_MEMORY_LINE,
            loop_locked: false,
            loop_flags: 0,
            sample_position: 0,
            block_position: BLOCK_SAMPLES,
            block: [0; BLOCK_SAMPLES],
            prev1: 0,
            prev2: 0,
            history: [0; 4],
            next_crest: 0,
            out_x: 0,
            end_flag: false,
        }
    }

    pub fn pitch(&self) -> u16 {
        self.pitch
    }

    pub fn write_pitch(&mut self, value: u16) {
        self.pitch = value & MAX_PITCH as u16;
    }

    pub fn address(&self, address: VoiceAddress) -> u32 {
        match address {
            VoiceAddress::Start => self.start_address,
            VoiceAddress::LoopStart => self.loop_start_address,
            VoiceAddress::Next => self.next_address,
        }
    }

    pub fn write_address_high(&mut self, address: VoiceAddress, value: u16) {
        self.address_mut(address).set_high_word(value & 0x000F);
    }

    pub fn write_address_low(&mut self, address: VoiceAddress, value: u16) {
        self.address_mut(address).set_low_word(value & 0xFFF8);
    }

    fn address_mut(&mut self, address: VoiceAddress) -> &mut u32 {
        match address {
            VoiceAddress::Start => &mut self.start_address,
            VoiceAddress::LoopStart => {
                self.loop_locked = true;
                &mut self.loop_start_address
            }
            VoiceAddress::Next => {
                self.block_position = BLOCK_SAMPLES;
                &mut self.next_address
            }
        }
    }

    pub fn out_x(&self) -> i32 {
        self.out_x
    }

    pub fn key_on(&mut self) {
        self.adsr.key_on();
        self.next_address = self.start_address;
        self.block_position = BLOCK_SAMPLES;
        self.loop_locked = false;
        self.loop_flags = 0;
        self.sample_position = 0;
        self.prev1 = 0;
        self.prev2 = 0;
        self.history = [0; 4];
        self.next_crest = 0;
        self.end_flag = false;
    }

    pub fn key_off(&mut self) {
        self.adsr.key_off();
    }

    /// Whether the voice passed an end point or finished its release since the last call.
    pub fn take_end_flag(&mut self) -> bool {
        std::mem::take(&mut self.end_flag)
    }

    /// Produce one output sample. `previous_out_x` is the previous voice's crest output, or
    /// `None` for voice 0 which cannot be pitch modulated.
    pub fn clock(&mut self, ctx: &mut MixContext<'_>, previous_out_x: Option<i32>) -> VoiceSample {
        // Slides run even while the voice is silent
        self.volume.clock();

        self.update_pitch(previous_out_x);

        if !self.adsr.is_active() {
            // Addresses keep advancing so that IRQs and end flags still fire
            while self.sample_position > 0 {
                self.skip_samples(ctx);
            }
            return VoiceSample::default();
        }

        let value = if self.noise {
            while self.sample_position > 0 {
                if self.skip_samples(ctx) {
                    self.adsr.stop();
                }
            }
            ctx.noise.next_sample()
        } else {
            self.interpolated_sample(ctx)
        };

        if self.adsr.is_active() && !self.adsr.step() {
            self.end_flag = true;
        }

        let value = mul_shr32(value, self.adsr.value());

        let [pv1, pv2, ..] = self.history;
        if pv1 < self.next_crest {
            self.out_x = mul_shr32(self.next_crest, self.adsr.value());
            self.next_crest = -0x8000;
        }
        if pv1 > pv2 {
            self.next_crest = pv1;
        }

        VoiceSample {
            left: apply_volume(value, self.volume.left.multiplier()),
            right: apply_volume(value, self.volume.right.multiplier()),
            raw: self.out_x,
        }
    }

    fn update_pitch(&mut self, previous_out_x: Option<i32>) {
        let pitch = match previous_out_x {
            Some(out_x) if self.modulated => {
                ((i32::from(self.pitch) * (32768 + out_x.abs())) >> 15).clamp(0, MAX_PITCH)
            }
            _ => i32::from(self.pitch),
        };
        self.sample_position += pitch;
    }

    fn interpolated_sample(&mut self, ctx: &mut MixContext<'_>) -> i32 {
        let four_tap = ctx.interpolation.is_four_tap();
        while self.sample_position > 0 {
            if four_tap {
                self.history[3] = self.history[2];
                self.history[2] = self.history[1];
            }
            self.history[1] = self.history[0];
            self.history[0] = self.next_sample(ctx);
            self.sample_position -= SAMPLE_STEP;
        }

        interpolate::interpolate(ctx.interpolation, &self.history, self.sample_position)
    }

    fn next_sample(&mut self, ctx: &mut MixContext<'_>) -> i32 {
        if self.block_position & 3 == 0 && self.advance_address(ctx) {
            self.adsr.stop();
        }

        if self.block_position == BLOCK_SAMPLES {
            self.start_block(ctx);
            self.block = *ctx.memory.adpcm_block(self.next_address, &mut self.prev1, &mut self.prev2);
        }

        let sample = self.block[self.block_position];
        self.block_position += 1;
        sample.into()
    }

    /// Advance through the block a group of 4 samples at a time without decoding.
    /// Returns `true` if the voice hit an end point without the loop flag.
    fn skip_samples(&mut self, ctx: &mut MixContext<'_>) -> bool {
        let stop = self.advance_address(ctx);

        if self.block_position == BLOCK_SAMPLES {
            self.start_block(ctx);
        }

        let skipped = 4 - (self.block_position & 3);
        self.sample_position -= SAMPLE_STEP * skipped as i32;
        self.block_position += skipped;

        stop
    }

    // Called once per 4 samples; each data word holds 4 nibbles
    fn advance_address(&mut self, ctx: &mut MixContext<'_>) -> bool {
        ctx.irq.check(self.next_address);
        self.next_address = (self.next_address + 1) & ADDRESS_MASK;

        if self.next_address & 7 != 0 {
            return false;
        }

        if self.loop_flags & LOOP_END != 0 {
            self.end_flag = true;
            self.next_address = self.loop_start_address | 1;
            return self.loop_flags & LOOP_REPEAT == 0;
        }

        // Skip over the next block's header
        self.next_address += 1;
        false
    }

    fn start_block(&mut self, ctx: &mut MixContext<'_>) {
        self.block_position = 0;

        let header_address = self.next_address & !7;
        ctx.irq.check(header_address);

        self.loop_flags = ctx.memory.loop_flags(header_address);
        if self.loop_flags & LOOP_START != 0 && !self.loop_locked {
            self.loop_start_address = header_address;
        }
    }
}

impl Default for Voice {
    fn default() -> Self {
        Self::new()
    }
}
