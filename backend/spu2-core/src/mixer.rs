//! One SPU2 core: 24 voices, the voice/input/external routing gates, reverb, and master volume

use crate::irq::IrqLines;
use crate::memory::{ADDRESS_MASK, SoundMemory};
use crate::registers::{Channel, CoreRegister, Half, OutputRegister, VOICES_PER_CORE, VoiceParam};
use crate::reverb::ReverbUnit;
use crate::voice::{MixContext, Voice, VoiceAddress};
use crate::volume::{FixedVolume, StereoVolume, apply_volume};
use bincode::{Decode, Encode};
use spu2_common::num::{GetBit, I32Ext, U32Ext};
use std::array;

const VOICE_MASK: u32 = (1 << VOICES_PER_CORE) - 1;

const DEFAULT_MIXER_GATES: u16 = 0xFFCF;
const DEFAULT_STATUS: u16 = 0x0080;

// Core 0 has no external input
const CORE_0_MIXER_GATE_MASK: u16 = 0x0FF0;

// Sound data input (AutoDMA) ring buffers, one 0x200-word buffer per channel
const INPUT_BUFFER_START: u32 = 0x2000;
const INPUT_BUFFER_LEN: u32 = 0x200;

// Mixer staging area in the dynamic region, written once per output sample
pub const STAGING_BUFFER_LEN: u32 = 0x200;
const STAGING_VOICE_1: u32 = 0x0400;
const STAGING_VOICE_3: u32 = 0x0600;
const STAGING_DRY_LEFT: u32 = 0x1000;
const STAGING_DRY_RIGHT: u32 = 0x1200;
const STAGING_WET_LEFT: u32 = 0x1400;
const STAGING_WET_RIGHT: u32 = 0x1600;
const STAGING_CORE_STRIDE: u32 = 0x0800;

// MMIX bits
const WET_EXTERNAL_RIGHT: u8 = 0;
const WET_EXTERNAL_LEFT: u8 = 1;
const DRY_EXTERNAL_RIGHT: u8 = 2;
const DRY_EXTERNAL_LEFT: u8 = 3;
const WET_INPUT_RIGHT: u8 = 4;
const WET_INPUT_LEFT: u8 = 5;
const DRY_INPUT_RIGHT: u8 = 6;
const DRY_INPUT_LEFT: u8 = 7;
const WET_VOICES_RIGHT: u8 = 8;
const WET_VOICES_LEFT: u8 = 9;
const DRY_VOICES_RIGHT: u8 = 10;
const DRY_VOICES_LEFT: u8 = 11;

// All-ones or all-zeros, for AND-masking samples through a routing gate
#[inline(always)]
fn gate(enabled: bool) -> i32 {
    -i32::from(enabled)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StereoSample {
    left: i32,
    right: i32,
}

impl StereoSample {
    fn gated(self, left: bool, right: bool) -> Self {
        Self { left: self.left & gate(left), right: self.right & gate(right) }
    }

    fn clamped(self) -> Self {
        Self { left: self.left.clamp_to_i16().into(), right: self.right.clamp_to_i16().into() }
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self { left: self.left + rhs.left, right: self.right + rhs.right }
    }
}

/// Per-tick state owned by the engine rather than by either core
#[derive(Debug, Clone, Copy)]
pub struct MixTiming {
    pub output_position: u32,
    pub odd_tick: bool,
    pub effects_enabled: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct SpuCore {
    index: usize,
    pub voices: [Voice; VOICES_PER_CORE],
    pitch_modulation: u32,
    noise: u32,
    dry_left_gates: u32,
    dry_right_gates: u32,
    wet_left_gates: u32,
    wet_right_gates: u32,
    mixer_gates: u16,
    attr: u16,
    end_flags: u32,
    status: u16,
    master_volume: StereoVolume,
    effects_volume: FixedVolume,
    external_volume: FixedVolume,
    input_volume: FixedVolume,
    pub reverb: ReverbUnit,
    transfer_address: u32,
    auto_dma: u16,
    input_position: u32,
}

impl SpuCore {
    pub fn new(index: usize) -> Self {
        let mixer_gates =
            if index == 0 { DEFAULT_MIXER_GATES & CORE_0_MIXER_GATE_MASK } else { DEFAULT_MIXER_GATES };

        Self {
            index,
            voices: array::from_fn(|_| Voice::new()),
            pitch_modulation: 0,
            noise: 0,
            dry_left_gates: VOICE_MASK,
            dry_right_gates: VOICE_MASK,
            wet_left_gates: VOICE_MASK,
            wet_right_gates: VOICE_MASK,
            mixer_gates,
            attr: 0,
            end_flags: 0,
            status: DEFAULT_STATUS,
            master_volume: StereoVolume::new(0x3FFF),
            effects_volume: FixedVolume::MAX,
            external_volume: FixedVolume::MAX,
            input_volume: FixedVolume::MAX,
            reverb: ReverbUnit::new(index),
            transfer_address: 0,
            auto_dma: 0,
            input_position: 0,
        }
    }

    pub fn end_flags(&self) -> u32 {
        self.end_flags
    }

    pub fn transfer_address(&self) -> u32 {
        self.transfer_address
    }

    pub fn set_transfer_address(&mut self, address: u32) {
        self.transfer_address = address & ADDRESS_MASK;
    }

    pub fn external_volume(&self) -> FixedVolume {
        self.external_volume
    }

    fn effects_enabled(&self) -> bool {
        self.attr.bit(7)
    }

    fn muted(&self) -> bool {
        self.attr.bit(14)
    }

    /// Mix one output sample. `external` is the external input (core 0's output for core 1).
    pub fn mix_sample(
        &mut self,
        ctx: &mut MixContext<'_>,
        external: (i32, i32),
        timing: MixTiming,
    ) -> (i16, i16) {
        let input = self.read_input(ctx);
        let external = StereoSample { left: external.0, right: external.1 };

        let (dry_voices, wet_voices) = self.mix_voices(ctx, timing.output_position);

        self.master_volume.clock();

        let staging_base = self.index as u32 * STAGING_CORE_STRIDE + timing.output_position;
        for (address, sample) in [
            (STAGING_DRY_LEFT, dry_voices.left),
            (STAGING_DRY_RIGHT, dry_voices.right),
            (STAGING_WET_LEFT, wet_voices.left),
            (STAGING_WET_RIGHT, wet_voices.right),
        ] {
            write_staging(ctx, staging_base + address, sample);
        }

        let gates = self.mixer_gates;
        let mut output = input.gated(gates.bit(DRY_INPUT_LEFT), gates.bit(DRY_INPUT_RIGHT))
            + dry_voices.gated(gates.bit(DRY_VOICES_LEFT), gates.bit(DRY_VOICES_RIGHT))
            + external.gated(gates.bit(DRY_EXTERNAL_LEFT), gates.bit(DRY_EXTERNAL_RIGHT));

        if timing.effects_enabled {
            // The work area cursor runs even while the core's effects are disabled
            self.reverb.advance(timing.odd_tick);

            if self.effects_enabled() {
                let wet = input.gated(gates.bit(WET_INPUT_LEFT), gates.bit(WET_INPUT_RIGHT))
                    + wet_voices.gated(gates.bit(WET_VOICES_LEFT), gates.bit(WET_VOICES_RIGHT))
                    + external.gated(gates.bit(WET_EXTERNAL_LEFT), gates.bit(WET_EXTERNAL_RIGHT));

                let (reverb_l, reverb_r) =
                    self.reverb.process(ctx.memory, (wet.left, wet.right), timing.odd_tick);

                // Coefficients are stored at half scale
                output = output
                    + StereoSample {
                        left: apply_volume(reverb_l * 2, self.effects_volume.left),
                        right: apply_volume(reverb_r * 2, self.effects_volume.right),
                    };
            }
        }

        if self.muted() {
            return (0, 0);
        }

        (
            apply_volume(output.left, self.master_volume.left.multiplier()).clamp_to_i16(),
            apply_volume(output.right, self.master_volume.right.multiplier()).clamp_to_i16(),
        )
    }

    fn read_input(&mut self, ctx: &mut MixContext<'_>) -> StereoSample {
        if !self.auto_dma.bit(self.index as u8) {
            return StereoSample::default();
        }

        let left_address = INPUT_BUFFER_START + self.index as u32 * 0x400 + self.input_position;
        let right_address = left_address + INPUT_BUFFER_LEN;
        ctx.irq.check(left_address);
        ctx.irq.check(right_address);

        let input = StereoSample {
            left: ctx.memory.read(left_address).into(),
            right: ctx.memory.read(right_address).into(),
        };
        self.input_position = (self.input_position + 1) % INPUT_BUFFER_LEN;

        StereoSample {
            left: apply_volume(input.left, self.input_volume.left),
            right: apply_volume(input.right, self.input_volume.right),
        }
    }

    fn mix_voices(&mut self, ctx: &mut MixContext<'_>, output_position: u32) -> (StereoSample, StereoSample) {
        let mut dry = StereoSample::default();
        let mut wet = StereoSample::default();

        let staging_base = self.index as u32 * STAGING_CORE_STRIDE + output_position;
        for i in 0..VOICES_PER_CORE {
            let previous_out_x = (i != 0).then(|| self.voices[i - 1].out_x());
            let voice = &mut self.voices[i];
            let sample = voice.clock(ctx, previous_out_x);

            if voice.take_end_flag() {
                self.end_flags |= 1 << i;
            }

            match i {
                1 => write_staging(ctx, staging_base + STAGING_VOICE_1, sample.raw),
                3 => write_staging(ctx, staging_base + STAGING_VOICE_3, sample.raw),
                _ => {}
            }

            let sample = StereoSample { left: sample.left, right: sample.right };
            dry = dry + sample.gated(self.dry_left_gates.bit(i as u8), self.dry_right_gates.bit(i as u8));
            wet = wet + sample.gated(self.wet_left_gates.bit(i as u8), self.wet_right_gates.bit(i as u8));
        }

        (dry.clamped(), wet.clamped())
    }

    pub fn key_on(&mut self, voices: u32) {
        if voices == 0 {
            return;
        }

        log::debug!("Core {} key on: {voices:06X}", self.index);

        self.end_flags &= !voices;
        for (i, voice) in self.voices.iter_mut().enumerate() {
            if voices.bit(i as u8) {
                voice.key_on();
            }
        }
    }

    pub fn key_off(&mut self, voices: u32) {
        if voices == 0 {
            return;
        }

        log::debug!("Core {} key off: {voices:06X}", self.index);

        for (i, voice) in self.voices.iter_mut().enumerate() {
            if voices.bit(i as u8) {
                voice.key_off();
            }
        }
    }

    pub fn read_voice_param(&self, voice: usize, param: VoiceParam) -> u16 {
        let voice = &self.voices[voice];
        match param {
            VoiceParam::VolumeLeft => voice.volume.left.register(),
            VoiceParam::VolumeRight => voice.volume.right.register(),
            VoiceParam::Pitch => voice.pitch(),
            VoiceParam::Adsr1 => voice.adsr.read_adsr1(),
            VoiceParam::Adsr2 => voice.adsr.read_adsr2(),
            VoiceParam::Envelope => voice.adsr.read_envx(),
            VoiceParam::CurrentVolumeLeft => voice.volume.left.level() as u16,
            VoiceParam::CurrentVolumeRight => voice.volume.right.level() as u16,
        }
    }

    pub fn write_voice_param(&mut self, voice_idx: usize, param: VoiceParam, value: u16) {
        let core = self.index;
        let voice = &mut self.voices[voice_idx];
        match param {
            VoiceParam::VolumeLeft => {
                voice.volume.left.write(value);
                log::trace!("  Core {core} voice {voice_idx} volume L: {value:04X}");
            }
            VoiceParam::VolumeRight => {
                voice.volume.right.write(value);
                log::trace!("  Core {core} voice {voice_idx} volume R: {value:04X}");
            }
            VoiceParam::Pitch => {
                voice.write_pitch(value);
                log::trace!("  Core {core} voice {voice_idx} pitch: {:04X}", voice.pitch());
            }
            VoiceParam::Adsr1 => {
                voice.adsr.write_adsr1(value);
                log::trace!("  Core {core} voice {voice_idx} ADSR1: {value:04X}");
            }
            VoiceParam::Adsr2 => {
                voice.adsr.write_adsr2(value);
                log::trace!("  Core {core} voice {voice_idx} ADSR2: {value:04X}");
            }
            VoiceParam::Envelope => {
                voice.adsr.write_envx(value);
                log::trace!("  Core {core} voice {voice_idx} envelope level: {value:04X}");
            }
            VoiceParam::CurrentVolumeLeft | VoiceParam::CurrentVolumeRight => {
                log::warn!("Write to read-only VOLX register, core {core} voice {voice_idx}: {value:04X}");
            }
        }
    }

    pub fn read_voice_address(&self, voice: usize, address: VoiceAddress, half: Half) -> u16 {
        let address = self.voices[voice].address(address);
        match half {
            Half::High => address.high_word(),
            Half::Low => address.low_word(),
        }
    }

    pub fn write_voice_address(&mut self, voice_idx: usize, address: VoiceAddress, half: Half, value: u16) {
        let voice = &mut self.voices[voice_idx];
        match half {
            Half::High => voice.write_address_high(address, value),
            Half::Low => voice.write_address_low(address, value),
        }

        log::trace!(
            "  Core {} voice {voice_idx} {address:?} address: {:05X}",
            self.index,
            voice.address(address)
        );
    }

    pub fn read_register(
        &mut self,
        register: CoreRegister,
        memory: &SoundMemory,
        irq: &mut IrqLines,
    ) -> u16 {
        let mask_word = |mask: u32, half: Half| match half {
            Half::Low => mask.low_word(),
            Half::High => mask.high_word(),
        };

        match register {
            CoreRegister::PitchModulation(half) => mask_word(self.pitch_modulation, half),
            CoreRegister::Noise(half) => mask_word(self.noise, half),
            CoreRegister::DryLeftGates(half) => mask_word(self.dry_left_gates, half),
            CoreRegister::WetLeftGates(half) => mask_word(self.wet_left_gates, half),
            CoreRegister::DryRightGates(half) => mask_word(self.dry_right_gates, half),
            CoreRegister::WetRightGates(half) => mask_word(self.wet_right_gates, half),
            CoreRegister::MixerGates => self.mixer_gates,
            CoreRegister::Attr => self.attr,
            CoreRegister::IrqAddress(Half::High) => irq.address(self.index).high_word(),
            CoreRegister::IrqAddress(Half::Low) => irq.address(self.index).low_word(),
            // Key on/off registers read back as zero
            CoreRegister::KeyOn(_) | CoreRegister::KeyOff(_) => 0,
            CoreRegister::TransferAddress(Half::High) => self.transfer_address.high_word(),
            CoreRegister::TransferAddress(Half::Low) => self.transfer_address.low_word(),
            CoreRegister::DataPort => {
                irq.check(self.transfer_address);
                let value = memory.read(self.transfer_address) as u16;
                self.transfer_address = (self.transfer_address + 1) & ADDRESS_MASK;
                value
            }
            CoreRegister::AutoDma => self.auto_dma,
            CoreRegister::EffectsStart(Half::High) => self.reverb.start().high_word(),
            CoreRegister::EffectsStart(Half::Low) => self.reverb.start().low_word(),
            CoreRegister::EffectsOffset(offset, Half::High) => self.reverb.offset(offset).high_word(),
            CoreRegister::EffectsOffset(offset, Half::Low) => self.reverb.offset(offset).low_word(),
            CoreRegister::EffectsEnd => self.reverb.end().high_word(),
            CoreRegister::EndFlags(half) => mask_word(self.end_flags, half),
            CoreRegister::Status => self.status,
        }
    }

    pub fn write_register(
        &mut self,
        register: CoreRegister,
        value: u16,
        memory: &mut SoundMemory,
        irq: &mut IrqLines,
    ) {
        let core = self.index;

        let set_mask_word = |mask: &mut u32, half: Half| {
            match half {
                Half::Low => mask.set_low_word(value),
                Half::High => mask.set_high_word(value & 0x00FF),
            }
        };

        match register {
            CoreRegister::PitchModulation(half) => {
                set_mask_word(&mut self.pitch_modulation, half);
                // Voice 0 has no previous voice to modulate it
                self.pitch_modulation &= VOICE_MASK & !1;
                for (i, voice) in self.voices.iter_mut().enumerate() {
                    voice.modulated = self.pitch_modulation.bit(i as u8);
                }
                log::trace!("  Core {core} pitch modulation: {:06X}", self.pitch_modulation);
            }
            CoreRegister::Noise(half) => {
                set_mask_word(&mut self.noise, half);
                for (i, voice) in self.voices.iter_mut().enumerate() {
                    voice.noise = self.noise.bit(i as u8);
                }
                log::trace!("  Core {core} noise enabled: {:06X}", self.noise);
            }
            CoreRegister::DryLeftGates(half) => {
                set_mask_word(&mut self.dry_left_gates, half);
                log::trace!("  Core {core} dry L gates: {:06X}", self.dry_left_gates);
            }
            CoreRegister::WetLeftGates(half) => {
                set_mask_word(&mut self.wet_left_gates, half);
                log::trace!("  Core {core} wet L gates: {:06X}", self.wet_left_gates);
            }
            CoreRegister::DryRightGates(half) => {
                set_mask_word(&mut self.dry_right_gates, half);
                log::trace!("  Core {core} dry R gates: {:06X}", self.dry_right_gates);
            }
            CoreRegister::WetRightGates(half) => {
                set_mask_word(&mut self.wet_right_gates, half);
                log::trace!("  Core {core} wet R gates: {:06X}", self.wet_right_gates);
            }
            CoreRegister::MixerGates => {
                self.mixer_gates = if core == 0 { value & CORE_0_MIXER_GATE_MASK } else { value };
                log::trace!("  Core {core} MMIX: {:04X}", self.mixer_gates);
            }
            CoreRegister::Attr => self.write_attr(value, irq),
            CoreRegister::IrqAddress(Half::High) => {
                irq.write_address_high(core, value);
                log::trace!("  Core {core} IRQ address: {:05X}", irq.address(core));
            }
            CoreRegister::IrqAddress(Half::Low) => {
                irq.write_address_low(core, value);
                log::trace!("  Core {core} IRQ address: {:05X}", irq.address(core));
            }
            CoreRegister::KeyOn(Half::Low) => self.key_on(value.into()),
            CoreRegister::KeyOn(Half::High) => self.key_on(u32::from(value & 0x00FF) << 16),
            CoreRegister::KeyOff(Half::Low) => self.key_off(value.into()),
            CoreRegister::KeyOff(Half::High) => self.key_off(u32::from(value & 0x00FF) << 16),
            CoreRegister::TransferAddress(Half::High) => {
                self.transfer_address.set_high_word(value & 0x000F);
                log::trace!("  Core {core} transfer address: {:05X}", self.transfer_address);
            }
            CoreRegister::TransferAddress(Half::Low) => {
                self.transfer_address.set_low_word(value);
                log::trace!("  Core {core} transfer address: {:05X}", self.transfer_address);
            }
            CoreRegister::DataPort => {
                irq.check(self.transfer_address);
                memory.write(self.transfer_address, value as i16);
                self.transfer_address = (self.transfer_address + 1) & ADDRESS_MASK;
            }
            CoreRegister::AutoDma => {
                self.auto_dma = value;
                log::trace!("  Core {core} AutoDMA control: {value:04X}");
            }
            CoreRegister::EffectsStart(Half::High) => {
                self.reverb.write_start_high(value);
                log::trace!("  Core {core} effects start: {:05X}", self.reverb.start());
            }
            CoreRegister::EffectsStart(Half::Low) => {
                self.reverb.write_start_low(value);
                log::trace!("  Core {core} effects start: {:05X}", self.reverb.start());
            }
            CoreRegister::EffectsOffset(offset, Half::High) => {
                self.reverb.write_offset_high(offset, value);
                log::trace!("  Core {core} {offset:?}: {:05X}", self.reverb.offset(offset));
            }
            CoreRegister::EffectsOffset(offset, Half::Low) => {
                self.reverb.write_offset_low(offset, value);
                log::trace!("  Core {core} {offset:?}: {:05X}", self.reverb.offset(offset));
            }
            CoreRegister::EffectsEnd => {
                self.reverb.write_end(value);
                log::trace!("  Core {core} effects end: {:05X}", self.reverb.end());
            }
            // Any write clears the corresponding half, regardless of value
            CoreRegister::EndFlags(Half::Low) => self.end_flags &= 0x00FF_0000,
            CoreRegister::EndFlags(Half::High) => self.end_flags &= 0x0000_FFFF,
            CoreRegister::Status => {
                log::warn!("Write to read-only STATX register, core {core}: {value:04X}");
            }
        }
    }

    fn write_attr(&mut self, value: u16, irq: &mut IrqLines) {
        let core = self.index;

        if !self.attr.bit(15) && value.bit(15) {
            log::debug!("Core {core} reset");
            *self = Self::new(core);
            irq.reset_core(core);
        }

        self.attr = value;
        irq.set_enabled(core, value.bit(6));

        log::trace!("  Core {core} ATTR: {value:04X}");
        log::trace!("    IRQ enabled: {}", value.bit(6));
        log::trace!("    Effects enabled: {}", value.bit(7));
        log::trace!("    Noise clock: {:02X}", value.bits(8..=13));
        log::trace!("    Muted: {}", value.bit(14));
    }

    pub fn read_output_register(&self, register: OutputRegister) -> u16 {
        match register {
            OutputRegister::MasterVolume(Channel::Left) => self.master_volume.left.register(),
            OutputRegister::MasterVolume(Channel::Right) => self.master_volume.right.register(),
            OutputRegister::EffectsVolume(Channel::Left) => self.effects_volume.read_left(),
            OutputRegister::EffectsVolume(Channel::Right) => self.effects_volume.read_right(),
            OutputRegister::ExternalVolume(Channel::Left) => self.external_volume.read_left(),
            OutputRegister::ExternalVolume(Channel::Right) => self.external_volume.read_right(),
            OutputRegister::InputVolume(Channel::Left) => self.input_volume.read_left(),
            OutputRegister::InputVolume(Channel::Right) => self.input_volume.read_right(),
            OutputRegister::CurrentMasterVolume(Channel::Left) => self.master_volume.left.level() as u16,
            OutputRegister::CurrentMasterVolume(Channel::Right) => self.master_volume.right.level() as u16,
            OutputRegister::Coefficient(coefficient) => self.reverb.coefficient(coefficient) as u16,
        }
    }

    pub fn write_output_register(&mut self, register: OutputRegister, value: u16) {
        let core = self.index;
        match register {
            OutputRegister::MasterVolume(Channel::Left) => self.master_volume.left.write(value),
            OutputRegister::MasterVolume(Channel::Right) => self.master_volume.right.write(value),
            OutputRegister::EffectsVolume(Channel::Left) => self.effects_volume.write_left(value),
            OutputRegister::EffectsVolume(Channel::Right) => self.effects_volume.write_right(value),
            OutputRegister::ExternalVolume(Channel::Left) => self.external_volume.write_left(value),
            OutputRegister::ExternalVolume(Channel::Right) => self.external_volume.write_right(value),
            OutputRegister::InputVolume(Channel::Left) => self.input_volume.write_left(value),
            OutputRegister::InputVolume(Channel::Right) => self.input_volume.write_right(value),
            OutputRegister::CurrentMasterVolume(_) => {
                log::warn!("Write to read-only MVOLX register, core {core}: {value:04X}");
                return;
            }
            OutputRegister::Coefficient(coefficient) => self.reverb.write_coefficient(coefficient, value),
        }

        log::trace!("  Core {core} {register:?}: {value:04X}");
    }
}

pub fn write_staging(ctx: &mut MixContext<'_>, address: u32, sample: i32) {
    ctx.irq.check(address);
    ctx.memory.write_dynamic(address, sample.clamp_to_i16());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::NoiseGenerator;
    use spu2_config::InterpolationMode;
    use test_log::test;

    struct Harness {
        memory: SoundMemory,
        irq: IrqLines,
        noise: NoiseGenerator,
        core: SpuCore,
    }

    impl Harness {
        fn new(index: usize) -> Self {
            Self {
                memory: SoundMemory::new().unwrap(),
                irq: IrqLines::new(),
                noise: NoiseGenerator::new(),
                core: SpuCore::new(index),
            }
        }

        fn write(&mut self, register: CoreRegister, value: u16) {
            self.core.write_register(register, value, &mut self.memory, &mut self.irq);
        }

        fn read(&mut self, register: CoreRegister) -> u16 {
            self.core.read_register(register, &self.memory, &mut self.irq)
        }

        fn mix(&mut self, external: (i32, i32), tick: u32) -> (i16, i16) {
            let mut ctx = MixContext {
                memory: &mut self.memory,
                irq: &mut self.irq,
                noise: &mut self.noise,
                interpolation: InterpolationMode::Linear,
            };
            let timing = MixTiming {
                output_position: tick % STAGING_BUFFER_LEN,
                odd_tick: tick % 2 == 1,
                effects_enabled: true,
            };
            self.core.mix_sample(&mut ctx, external, timing)
        }

        // A block of constant full-scale samples looping on itself
        fn write_loud_block(&mut self, address: u32) {
            let flags = 0x0700;
            self.memory.write(address, flags);
            for i in 1..8 {
                // Shift 0, nibble 7: 0x7000
                self.memory.write(address + i, 0x7777);
            }
        }

        // Consecutive blocks alternating full-scale and zero samples, so a playing voice sees a
        // crest every other sample
        fn write_crest_blocks(&mut self, address: u32, blocks: u32) {
            for block in 0..blocks {
                let base = address + 8 * block;
                self.memory.write(base, 0);
                for i in 1..8 {
                    self.memory.write(base + i, 0x0707);
                }
            }
        }

        fn start_voice(&mut self, voice: usize, address: u32) {
            self.core.write_voice_address(voice, VoiceAddress::Start, Half::High, (address >> 16) as u16);
            self.core.write_voice_address(voice, VoiceAddress::Start, Half::Low, address as u16);
            self.core.write_voice_param(voice, VoiceParam::Pitch, 0x1000);
            self.core.write_voice_param(voice, VoiceParam::VolumeLeft, 0x3FFF);
            self.core.write_voice_param(voice, VoiceParam::VolumeRight, 0x3FFF);
            self.core.write_voice_param(voice, VoiceParam::Adsr1, 0x000F);
            self.core.key_on(1 << voice);
        }
    }

    #[test]
    fn silent_core_outputs_zero() {
        let mut harness = Harness::new(0);
        for tick in 0..64 {
            assert_eq!(harness.mix((0, 0), tick), (0, 0));
        }
    }

    #[test]
    fn saturates_with_every_voice_at_full_volume() {
        let mut harness = Harness::new(1);
        harness.write_loud_block(0x4000);
        for voice in 0..VOICES_PER_CORE {
            harness.start_voice(voice, 0x4000);
        }

        let mut saw_clipping = false;
        for tick in 0..256 {
            let (l, r) = harness.mix((i32::MAX / 4, i32::MIN / 4), tick);
            saw_clipping |= l == i16::MAX;
            assert!(r <= 0);
        }
        assert!(saw_clipping);

        // Voice mix staging is clamped too
        assert_eq!(harness.memory.read(STAGING_CORE_STRIDE + STAGING_DRY_LEFT + 255), i16::MAX);
    }

    #[test]
    fn dry_gates_mask_voices() {
        let mut harness = Harness::new(0);
        harness.write_loud_block(0x4000);
        harness.start_voice(0, 0x4000);

        harness.write(CoreRegister::DryLeftGates(Half::Low), 0);
        harness.write(CoreRegister::DryLeftGates(Half::High), 0);

        let mut right_peak = 0;
        for tick in 0..64 {
            let (l, r) = harness.mix((0, 0), tick);
            assert_eq!(l, 0);
            right_peak = right_peak.max(r);
        }
        assert!(right_peak > 0);
    }

    #[test]
    fn external_input_routing() {
        let mut harness = Harness::new(1);
        assert_eq!(harness.mix((0x1000, -0x1000), 0), (0x0FFF, -0x1000));

        // Dry external gates off
        harness.write(CoreRegister::MixerGates, 0xFFC3);
        assert_eq!(harness.mix((0x1000, -0x1000), 1), (0, 0));

        // Core 0 ignores external gates entirely
        let mut harness = Harness::new(0);
        assert_eq!(harness.read(CoreRegister::MixerGates), 0x0FC0);
        assert_eq!(harness.mix((0x1000, -0x1000), 0), (0, 0));
    }

    #[test]
    fn mute_silences_output() {
        let mut harness = Harness::new(1);
        harness.write(CoreRegister::Attr, 0x4000);
        assert_eq!(harness.mix((0x1000, 0x1000), 0), (0, 0));
    }

    #[test]
    fn key_on_clears_end_flags() {
        let mut harness = Harness::new(0);
        // Block with loop end and no repeat
        harness.memory.write(0x4000, 0x0100);
        harness.start_voice(2, 0x4000);

        for tick in 0..40 {
            harness.mix((0, 0), tick);
        }
        assert_eq!(harness.read(CoreRegister::EndFlags(Half::Low)), 0x0004);

        harness.core.key_on(1 << 2);
        assert_eq!(harness.read(CoreRegister::EndFlags(Half::Low)), 0);
    }

    #[test]
    fn end_flag_writes_clear_halves() {
        let mut harness = Harness::new(0);
        harness.core.end_flags = 0x00F0_00F0;
        harness.write(CoreRegister::EndFlags(Half::Low), 0);
        assert_eq!(harness.core.end_flags(), 0x00F0_0000);
        harness.write(CoreRegister::EndFlags(Half::High), 0);
        assert_eq!(harness.core.end_flags(), 0);
    }

    #[test]
    fn data_port_writes_through_transfer_address() {
        let mut harness = Harness::new(0);
        harness.write(CoreRegister::TransferAddress(Half::High), 0x0001);
        harness.write(CoreRegister::TransferAddress(Half::Low), 0x0000);
        harness.write(CoreRegister::DataPort, 0x1234);
        harness.write(CoreRegister::DataPort, 0x5678);

        assert_eq!(harness.memory.read(0x10000), 0x1234);
        assert_eq!(harness.memory.read(0x10001), 0x5678);
        assert_eq!(harness.core.transfer_address(), 0x10002);

        harness.write(CoreRegister::TransferAddress(Half::Low), 0x0000);
        assert_eq!(harness.read(CoreRegister::DataPort), 0x1234);
        assert_eq!(harness.core.transfer_address(), 0x10001);
    }

    #[test]
    fn core_enable_resets_core() {
        let mut harness = Harness::new(1);
        harness.write(CoreRegister::DryLeftGates(Half::Low), 0);
        harness.write(CoreRegister::Attr, 0x0040);
        harness.write(CoreRegister::IrqAddress(Half::Low), 0x1234);

        harness.write(CoreRegister::Attr, 0x8040);
        assert_eq!(harness.read(CoreRegister::DryLeftGates(Half::Low)), 0xFFFF);
        assert_eq!(harness.read(CoreRegister::Attr), 0x8040);
        assert_eq!(harness.read(CoreRegister::IrqAddress(Half::Low)), 0xFFF0);
    }

    #[test]
    fn input_ring_reads_when_auto_dma_active() {
        let mut harness = Harness::new(1);
        harness.memory.write(0x2400, 0x2000);
        harness.memory.write(0x2600, -0x2000);

        assert_eq!(harness.mix((0, 0), 0), (0, 0));

        harness.write(CoreRegister::AutoDma, 0x0002);
        // Input volume and master volume each lose a fraction of an LSB
        assert_eq!(harness.mix((0, 0), 1), (0x1FFE, -0x2000));
    }

    // Plays voices 0 and 1 over the same data and returns their next addresses
    fn run_voice_pair(pitch_modulation: u16) -> (u32, u32) {
        let mut harness = Harness::new(0);
        harness.write_crest_blocks(0x4000, 32);
        harness.write(CoreRegister::PitchModulation(Half::Low), pitch_modulation);
        harness.start_voice(0, 0x4000);
        harness.start_voice(1, 0x4000);

        for tick in 0..200 {
            harness.mix((0, 0), tick);
        }

        (
            harness.core.voices[0].address(VoiceAddress::Next),
            harness.core.voices[1].address(VoiceAddress::Next),
        )
    }

    #[test]
    fn pitch_modulation_follows_previous_voice() {
        let (plain_0, plain_1) = run_voice_pair(0x0000);
        assert_eq!(plain_0, plain_1);

        // Voice 0's crests speed up voice 1
        let (modulated_0, modulated_1) = run_voice_pair(0x0002);
        assert_eq!(modulated_0, plain_0);
        assert!(modulated_1 > plain_1, "{modulated_1:05X} <= {plain_1:05X}");

        // Voice 0 has no previous voice
        assert_eq!(run_voice_pair(0x0001), (plain_0, plain_1));
    }

    #[test]
    fn pitch_modulation_register_masks_voice_0() {
        let mut harness = Harness::new(0);
        harness.write(CoreRegister::PitchModulation(Half::Low), 0xFFFF);
        harness.write(CoreRegister::PitchModulation(Half::High), 0xFFFF);

        assert_eq!(harness.read(CoreRegister::PitchModulation(Half::Low)), 0xFFFE);
        assert_eq!(harness.read(CoreRegister::PitchModulation(Half::High)), 0x00FF);
        assert!(!harness.core.voices[0].modulated);
        assert!(harness.core.voices[1..].iter().all(|voice| voice.modulated));
    }

    #[test]
    fn voice_fetch_raises_other_core_irq() {
        let mut harness = Harness::new(0);
        harness.irq.write_address_high(1, 0x0000);
        harness.irq.write_address_low(1, 0x4002);
        harness.irq.set_enabled(1, true);

        harness.write_crest_blocks(0x4000, 1);
        harness.start_voice(0, 0x4000);
        for tick in 0..16 {
            harness.mix((0, 0), tick);
        }

        assert_eq!(harness.irq.take(), [false, true]);
    }
}
