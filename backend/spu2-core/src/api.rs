//! SPU2 public interface: register I/O, DMA, the per-sample tick, and save states

use crate::irq::IrqLines;
use crate::memory::SoundMemory;
use crate::mixer::{self, MixTiming, STAGING_BUFFER_LEN, SpuCore};
use crate::noise::NoiseGenerator;
use crate::registers::{self, Register};
use crate::voice::{EnvelopePhase, MixContext, VoiceAddress};
use crate::volume::apply_volume;
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use spu2_common::frontend::AudioOutput;
use spu2_config::Spu2Config;
use std::convert::Infallible;
use thiserror::Error;

// Core 0's final output is staged for core 1 and for the host to read back
const CORE_0_OUTPUT_LEFT: u32 = 0x0800;
const CORE_0_OUTPUT_RIGHT: u32 = 0x0A00;

#[derive(Debug, Error)]
pub enum Spu2Error<AErr = Infallible> {
    #[error("Unable to allocate {bytes} bytes for {what}")]
    Allocation { what: &'static str, bytes: usize },
    #[error("Error outputting audio samples: {0}")]
    AudioOutput(AErr),
    #[error("Error encoding save state: {0}")]
    SaveEncode(#[from] EncodeError),
    #[error("Error decoding save state: {0}")]
    SaveDecode(#[from] DecodeError),
}

pub type Spu2Result<T, AErr = Infallible> = Result<T, Spu2Error<AErr>>;

/// Snapshot of a single voice, for debugging and visualization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceStatus {
    pub phase: EnvelopePhase,
    pub envelope: i32,
    pub pitch: u16,
    pub next_address: u32,
    pub end_flag: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Spu2 {
    memory: SoundMemory,
    irq: IrqLines,
    noise: NoiseGenerator,
    cores: [SpuCore; 2],
    output_position: u32,
    odd_tick: bool,
    sample_count: u64,
    config: Spu2Config,
}

impl Spu2 {
    /// Create a new SPU2 with cleared sound RAM and both cores in their power-on state.
    ///
    /// # Errors
    ///
    /// Returns an error if sound RAM or the ADPCM cache cannot be allocated.
    pub fn new(config: Spu2Config) -> Spu2Result<Self> {
        Ok(Self {
            memory: SoundMemory::new()?,
            irq: IrqLines::new(),
            noise: NoiseGenerator::new(),
            cores: [SpuCore::new(0), SpuCore::new(1)],
            output_position: 0,
            odd_tick: false,
            sample_count: 0,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> Spu2Config {
        self.config
    }

    pub fn reload_config(&mut self, config: Spu2Config) {
        log::info!("Reloading SPU2 config: {config:?}");
        self.config = config;
    }

    /// Number of sample pairs mixed since power-on or the last reset.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn read_register(&mut self, address: u32) -> u16 {
        match registers::decode(address) {
            Register::Voice { core, voice, param } => self.cores[core].read_voice_param(voice, param),
            Register::VoiceAddress { core, voice, address, half } => {
                self.cores[core].read_voice_address(voice, address, half)
            }
            Register::Core { core, register } => {
                self.cores[core].read_register(register, &self.memory, &mut self.irq)
            }
            Register::Output { core, register } => self.cores[core].read_output_register(register),
            Register::IrqInfo => self.irq.info_bits(),
            Register::Unmapped => self.memory.register_shadow(address),
        }
    }

    pub fn write_register(&mut self, address: u32, value: u16) {
        self.memory.set_register_shadow(address, value);

        match registers::decode(address) {
            Register::Voice { core, voice, param } => {
                self.cores[core].write_voice_param(voice, param, value);
            }
            Register::VoiceAddress { core, voice, address, half } => {
                self.cores[core].write_voice_address(voice, address, half, value);
            }
            Register::Core { core, register } => {
                self.cores[core].write_register(register, value, &mut self.memory, &mut self.irq);
            }
            Register::Output { core, register } => {
                self.cores[core].write_output_register(register, value);
            }
            Register::IrqInfo | Register::Unmapped => {
                log::trace!("  Unmapped register write: {:03X} {value:04X}", address & 0x7FE);
            }
        }
    }

    /// Transfer words into sound RAM starting at the given core's transfer address, which is
    /// advanced past the written data.
    ///
    /// # Panics
    ///
    /// Panics if `core` is not 0 or 1.
    pub fn dma_write(&mut self, core: usize, data: &[u16]) {
        let start = self.cores[core].transfer_address();
        log::debug!("Core {core} DMA write: {} words at {start:05X}", data.len());

        for i in 0..data.len() as u32 {
            self.irq.check(start.wrapping_add(i));
        }
        self.memory.write_block(start, data);

        self.cores[core].set_transfer_address(start.wrapping_add(data.len() as u32));
    }

    #[must_use]
    pub fn read_memory(&self, address: u32) -> u16 {
        self.memory.read(address) as u16
    }

    pub fn write_memory(&mut self, address: u32, value: u16) {
        self.memory.write(address, value as i16);
    }

    /// Returns which cores have raised an IRQ since the last call, and clears them.
    pub fn take_irq(&mut self) -> [bool; 2] {
        self.irq.take()
    }

    /// Envelope and address state for one voice.
    ///
    /// # Panics
    ///
    /// Panics if `core` is not 0 or 1, or if `voice` is not in `0..24`.
    #[must_use]
    pub fn voice_status(&self, core: usize, voice: usize) -> VoiceStatus {
        let spu_core = &self.cores[core];
        let state = &spu_core.voices[voice];
        VoiceStatus {
            phase: state.adsr.phase(),
            envelope: state.adsr.value(),
            pitch: state.pitch(),
            next_address: state.address(VoiceAddress::Next),
            end_flag: spu_core.end_flags() & (1 << voice) != 0,
        }
    }

    /// Mix one sample pair and push it to the audio output.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the audio output.
    pub fn tick<A: AudioOutput>(&mut self, audio_output: &mut A) -> Spu2Result<(), A::Err> {
        let (left, right) = self.mix_sample();
        audio_output.push_sample(left, right).map_err(Spu2Error::AudioOutput)
    }

    fn mix_sample(&mut self) -> (i16, i16) {
        let timing = MixTiming {
            output_position: self.output_position,
            odd_tick: self.odd_tick,
            effects_enabled: self.config.effects_enabled,
        };

        let mut ctx = MixContext {
            memory: &mut self.memory,
            irq: &mut self.irq,
            noise: &mut self.noise,
            interpolation: self.config.interpolation,
        };

        // Core 0 must be mixed first; its output is core 1's external input
        let [core_0, core_1] = &mut self.cores;
        let (core_0_l, core_0_r) = core_0.mix_sample(&mut ctx, (0, 0), timing);
        mixer::write_staging(&mut ctx, CORE_0_OUTPUT_LEFT + self.output_position, core_0_l.into());
        mixer::write_staging(&mut ctx, CORE_0_OUTPUT_RIGHT + self.output_position, core_0_r.into());

        let external_volume = core_1.external_volume();
        let external = (
            apply_volume(core_0_l.into(), external_volume.left),
            apply_volume(core_0_r.into(), external_volume.right),
        );
        let output = core_1.mix_sample(&mut ctx, external, timing);

        self.output_position = (self.output_position + 1) % STAGING_BUFFER_LEN;
        self.odd_tick = !self.odd_tick;
        self.sample_count += 1;

        let interval = self.config.cache_stats_interval;
        if interval != 0 && self.sample_count % u64::from(interval) == 0 {
            let stats = self.memory.take_cache_stats();
            log::debug!(
                "ADPCM cache over {interval} samples: {} hits, {} misses, {} ignores",
                stats.hits,
                stats.misses,
                stats.ignores
            );
        }

        output
    }

    /// Clear sound RAM and return both cores to their power-on state. Config is retained.
    pub fn reset(&mut self) {
        log::info!("Resetting SPU2");

        self.memory.clear();
        self.irq = IrqLines::new();
        self.noise = NoiseGenerator::new();
        self.cores = [SpuCore::new(0), SpuCore::new(1)];
        self.output_position = 0;
        self.odd_tick = false;
        self.sample_count = 0;
    }

    /// # Errors
    ///
    /// Returns an error if the state cannot be encoded.
    pub fn save_state(&self) -> Spu2Result<Vec<u8>> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())?;
        Ok(bytes)
    }

    /// Restore a state produced by [`Self::save_state`]. The current config is kept. The ADPCM
    /// cache is not part of the state and starts out empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not decode to a valid state. The current state is left
    /// unchanged in that case.
    pub fn load_state(&mut self, bytes: &[u8]) -> Spu2Result<()> {
        let (mut state, _): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())?;
        state.config = self.config;
        *self = state;

        log::info!("Loaded SPU2 state at sample {}", self.sample_count);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adpcm::{LOOP_END, LOOP_REPEAT, LOOP_START};
    use test_log::test;

    const CORE_1: u32 = 0x400;

    fn new_spu2() -> Spu2 {
        Spu2::new(Spu2Config::default()).unwrap()
    }

    fn write_voice(spu2: &mut Spu2, core_base: u32, voice: u32, param: u32, value: u16) {
        spu2.write_register(core_base + voice * 0x10 + param * 2, value);
    }

    fn write_start_address(spu2: &mut Spu2, core_base: u32, voice: u32, address: u32) {
        let base = core_base + 0x1C0 + voice * 0xC;
        spu2.write_register(base, (address >> 16) as u16);
        spu2.write_register(base + 2, address as u16);
    }

    fn write_block(spu2: &mut Spu2, address: u32, header: u16, data_word: u16) {
        let mut block = [data_word; 8];
        block[0] = header;
        spu2.write_register(0x1A8, (address >> 16) as u16);
        spu2.write_register(0x1AA, address as u16);
        spu2.dma_write(0, &block);
    }

    fn tick_n(spu2: &mut Spu2, n: usize) -> Vec<(i16, i16)> {
        let mut output = Vec::new();
        for _ in 0..n {
            spu2.tick(&mut output).unwrap();
        }
        output
    }

    #[test]
    fn silent_block_with_fast_attack() {
        let mut spu2 = new_spu2();
        write_block(&mut spu2, 0x3000, u16::from(LOOP_START | LOOP_REPEAT | LOOP_END) << 8, 0x0000);

        write_start_address(&mut spu2, CORE_1, 0, 0x3000);
        write_voice(&mut spu2, CORE_1, 0, 0, 0x3FFF);
        write_voice(&mut spu2, CORE_1, 0, 1, 0x3FFF);
        write_voice(&mut spu2, CORE_1, 0, 2, 0x1000);
        // Attack rate 0 (fastest), sustain level max
        write_voice(&mut spu2, CORE_1, 0, 3, 0x000F);
        spu2.write_register(CORE_1 + 0x1A0, 0x0001);

        assert_eq!(spu2.voice_status(1, 0).phase, EnvelopePhase::Attack);

        let mut previous = 0;
        let mut saturated_at = None;
        for tick in 0..28 {
            assert_eq!(tick_n(&mut spu2, 1), vec![(0, 0)]);

            let envelope = spu2.voice_status(1, 0).envelope;
            if saturated_at.is_none() {
                assert!(envelope >= previous);
                previous = envelope;
                if envelope == i32::MAX {
                    saturated_at = Some(tick);
                }
            }
        }

        assert!(saturated_at.is_some_and(|tick| tick <= 3), "{saturated_at:?}");
        assert_ne!(spu2.voice_status(1, 0).phase, EnvelopePhase::Attack);
        assert_eq!(spu2.read_register(CORE_1 + 0x0A), 0x7FFF);
    }

    #[test]
    fn noise_and_wave_voices_diverge() {
        let mut spu2 = new_spu2();
        write_block(&mut spu2, 0x3000, u16::from(LOOP_START | LOOP_REPEAT | LOOP_END) << 8, 0x7531);

        for voice in 0..2 {
            write_start_address(&mut spu2, CORE_1, voice, 0x3000);
            write_voice(&mut spu2, CORE_1, voice, 2, 0x1000);
            write_voice(&mut spu2, CORE_1, voice, 3, 0x000F);
            // Route each voice to a different channel
            write_voice(&mut spu2, CORE_1, voice, 0, if voice == 0 { 0x3FFF } else { 0 });
            write_voice(&mut spu2, CORE_1, voice, 1, if voice == 1 { 0x3FFF } else { 0 });
        }
        // Voice 1 is the noise voice
        spu2.write_register(CORE_1 + 0x184, 0x0002);
        spu2.write_register(CORE_1 + 0x1A0, 0x0003);

        let output = tick_n(&mut spu2, 64);
        let wave: Vec<_> = output.iter().map(|&(l, _)| l).collect();
        let noise: Vec<_> = output.iter().map(|&(_, r)| r).collect();

        assert!(wave.iter().any(|&sample| sample != 0));
        assert!(noise.iter().any(|&sample| sample != 0));
        assert_ne!(wave, noise);
    }

    #[test]
    fn register_readback() {
        let mut spu2 = new_spu2();

        write_voice(&mut spu2, 0, 5, 2, 0xFFFF);
        assert_eq!(spu2.read_register(5 * 0x10 + 4), 0x3FFF);

        write_voice(&mut spu2, CORE_1, 7, 3, 0x8F3A);
        assert_eq!(spu2.read_register(CORE_1 + 7 * 0x10 + 6), 0x8F3A);

        write_start_address(&mut spu2, 0, 3, 0x2_3457);
        assert_eq!(spu2.read_register(0x1C0 + 3 * 0xC), 0x0002);
        assert_eq!(spu2.read_register(0x1C0 + 3 * 0xC + 2), 0x3450);

        spu2.write_register(CORE_1 + 0x188, 0x1234);
        spu2.write_register(CORE_1 + 0x18A, 0xFF56);
        assert_eq!(spu2.read_register(CORE_1 + 0x188), 0x1234);
        assert_eq!(spu2.read_register(CORE_1 + 0x18A), 0x0056);

        spu2.write_register(0x2E0, 0x0003);
        spu2.write_register(0x2E2, 0x1000);
        spu2.write_register(0x33C, 0x0004);
        assert_eq!(spu2.read_register(0x2E0), 0x0003);
        assert_eq!(spu2.read_register(0x2E2), 0x1000);
        assert_eq!(spu2.read_register(0x33C), 0x0004);

        spu2.write_register(0x784 + 0x28, 0x4000);
        assert_eq!(spu2.read_register(0x784 + 0x28), 0x4000);

        // Key on reads back as zero; unmapped addresses read back the shadow
        spu2.write_register(0x1A0, 0x0000);
        assert_eq!(spu2.read_register(0x1A0), 0);
        spu2.write_register(0x7C4, 0xBEEF);
        assert_eq!(spu2.read_register(0x7C4), 0xBEEF);
    }

    #[test]
    fn dma_raises_irq_at_matching_word() {
        let mut spu2 = new_spu2();
        spu2.write_register(0x19C, 0x0001);
        spu2.write_register(0x19E, 0x0004);
        // IRQ enable
        spu2.write_register(0x19A, 0x0040);

        spu2.write_register(0x1A8, 0x0001);
        spu2.write_register(0x1AA, 0x0000);
        spu2.dma_write(0, &[0x1111, 0x2222, 0x3333]);
        assert_eq!(spu2.take_irq(), [false, false]);
        assert_eq!(spu2.read_register(0x1AA), 0x0003);

        spu2.dma_write(0, &[0x4444, 0x5555]);
        assert_eq!(spu2.take_irq(), [true, false]);
        assert_eq!(spu2.take_irq(), [false, false]);
        assert_eq!(spu2.read_memory(0x10004), 0x5555);

        assert_eq!(spu2.read_register(registers::IRQ_INFO_ADDRESS), 0x0004);
        spu2.write_register(0x19A, 0x0000);
        assert_eq!(spu2.read_register(registers::IRQ_INFO_ADDRESS), 0);
    }

    #[test]
    fn mixer_staging_write_raises_irq() {
        let mut spu2 = new_spu2();
        // Core 1 dry left staging, output position 5
        spu2.write_register(CORE_1 + 0x19C, 0x0000);
        spu2.write_register(CORE_1 + 0x19E, 0x1805);
        spu2.write_register(CORE_1 + 0x19A, 0x0040);

        tick_n(&mut spu2, 5);
        assert_eq!(spu2.take_irq(), [false, false]);

        tick_n(&mut spu2, 1);
        assert_eq!(spu2.take_irq(), [false, true]);
        assert_eq!(spu2.read_register(registers::IRQ_INFO_ADDRESS), 0x0008);
    }

    #[test]
    #[should_panic]
    fn dma_write_to_missing_core_panics() {
        new_spu2().dma_write(2, &[0x1234]);
    }

    #[test]
    fn dma_invalidates_decoded_blocks() {
        let mut spu2 = new_spu2();
        write_block(&mut spu2, 0x3000, u16::from(LOOP_START | LOOP_REPEAT | LOOP_END) << 8, 0x1111);

        write_start_address(&mut spu2, CORE_1, 0, 0x3000);
        write_voice(&mut spu2, CORE_1, 0, 0, 0x3FFF);
        write_voice(&mut spu2, CORE_1, 0, 2, 0x1000);
        write_voice(&mut spu2, CORE_1, 0, 3, 0x000F);
        spu2.write_register(CORE_1 + 0x1A0, 0x0001);

        let before = tick_n(&mut spu2, 56);
        write_block(&mut spu2, 0x3000, u16::from(LOOP_START | LOOP_REPEAT | LOOP_END) << 8, 0x7777);
        let after = tick_n(&mut spu2, 56);

        let peak = |samples: &[(i16, i16)]| samples.iter().map(|&(l, _)| l).max().unwrap_or(0);
        assert!(peak(&after[28..]) > peak(&before[28..]));
    }

    #[test]
    fn output_saturates() {
        let mut spu2 = new_spu2();
        // Shift 0, nibble 7: full scale positive
        write_block(&mut spu2, 0x3000, u16::from(LOOP_START | LOOP_REPEAT | LOOP_END) << 8, 0x7777);

        for core_base in [0, CORE_1] {
            for voice in 0..24 {
                write_start_address(&mut spu2, core_base, voice, 0x3000);
                write_voice(&mut spu2, core_base, voice, 0, 0x3FFF);
                write_voice(&mut spu2, core_base, voice, 1, 0x3FFF);
                write_voice(&mut spu2, core_base, voice, 2, 0x1000);
                write_voice(&mut spu2, core_base, voice, 3, 0x000F);
            }
            spu2.write_register(core_base + 0x1A0, 0xFFFF);
            spu2.write_register(core_base + 0x1A2, 0x00FF);
        }

        let output = tick_n(&mut spu2, 128);
        assert!(output.iter().any(|&(l, r)| l == i16::MAX && r == i16::MAX));
        // Core 0's output is staged for the host too. Master volume 0x3FFF is just under unity.
        assert_eq!(spu2.read_memory(CORE_0_OUTPUT_LEFT + 127), 32765);
    }

    #[test]
    fn save_state_round_trip() {
        let mut spu2 = new_spu2();
        write_block(&mut spu2, 0x3000, 0x000C | (u16::from(LOOP_START | LOOP_REPEAT | LOOP_END) << 8), 0x4321);
        write_start_address(&mut spu2, CORE_1, 2, 0x3000);
        write_voice(&mut spu2, CORE_1, 2, 0, 0x3FFF);
        write_voice(&mut spu2, CORE_1, 2, 1, 0x2000);
        write_voice(&mut spu2, CORE_1, 2, 2, 0x0C00);
        write_voice(&mut spu2, CORE_1, 2, 3, 0x3F0F);
        spu2.write_register(CORE_1 + 0x1A0, 0x0004);
        tick_n(&mut spu2, 100);

        let state = spu2.save_state().unwrap();
        let expected = tick_n(&mut spu2, 200);

        let mut restored = new_spu2();
        restored.load_state(&state).unwrap();
        assert_eq!(restored.sample_count(), 100);
        assert_eq!(restored.read_register(CORE_1 + 0x1C0 + 2 * 0xC + 2), 0x3000);
        assert_eq!(tick_n(&mut restored, 200), expected);

        assert!(restored.load_state(&state[..state.len() / 2]).is_err());
        assert_eq!(restored.sample_count(), 300);
    }

    #[test]
    fn reset_clears_memory_and_voices() {
        let mut spu2 = new_spu2();
        write_block(&mut spu2, 0x3000, 0x0000, 0x1234);
        write_voice(&mut spu2, 0, 0, 2, 0x1000);
        spu2.write_register(0x1A0, 0x0001);
        tick_n(&mut spu2, 10);

        spu2.reset();
        assert_eq!(spu2.read_memory(0x3001), 0);
        assert_eq!(spu2.voice_status(0, 0).phase, EnvelopePhase::Off);
        assert_eq!(spu2.voice_status(0, 0).pitch, 0x3FFF);
        assert_eq!(spu2.sample_count(), 0);
    }

    #[test]
    fn effects_toggle_leaves_work_area_untouched() {
        let mut spu2 = new_spu2();
        // Work area 0x70000..=0x7FFFF, all offsets 0, effects enabled
        spu2.write_register(0x2E0, 0x0007);
        spu2.write_register(0x2E2, 0x0000);
        spu2.write_register(0x33C, 0x0007);
        spu2.write_register(0x19A, 0x0080);
        // IIR_ALPHA, IN_COEF_L, IN_COEF_R
        spu2.write_register(0x774, 0x7FFF);
        spu2.write_register(0x784, 0x7FFF);
        spu2.write_register(0x786, 0x7FFF);
        // Feed a constant into the wet path through the AutoDMA input
        spu2.write_register(0x198, 0x0FF0);
        spu2.write_memory(0x2000, 0x4000);
        spu2.write_memory(0x2200, 0x4000);
        spu2.write_register(0x1B0, 0x0001);

        spu2.reload_config(Spu2Config { effects_enabled: false, ..Spu2Config::default() });
        tick_n(&mut spu2, 16);
        assert!((0x70000..0x70020).all(|address| spu2.read_memory(address) == 0));

        spu2.reload_config(Spu2Config::default());
        tick_n(&mut spu2, 16);
        assert!((0x70000..0x70020).any(|address| spu2.read_memory(address) != 0));
    }
}
