//! SPU2 register address decoding
//!
//! Register addresses are byte offsets into a 0x800-byte window. Each core owns 0x400 bytes of
//! voice and mixer registers (core 1 at +0x400), except that the output volumes and reverb
//! coefficients for both cores live in a shared block at 0x760.

use crate::reverb::{ReverbCoefficient, ReverbOffset};
use crate::voice::VoiceAddress;

pub const VOICES_PER_CORE: usize = 24;

const CORE_SIZE: u32 = 0x400;
const OUTPUT_BLOCK_START: u32 = 0x760;
const OUTPUT_BLOCK_CORE_SIZE: u32 = 0x28;
const SPDIF_BLOCK_START: u32 = 0x7C0;
pub const IRQ_INFO_ADDRESS: u32 = 0x7C2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceParam {
    VolumeLeft,
    VolumeRight,
    Pitch,
    Adsr1,
    Adsr2,
    Envelope,
    CurrentVolumeLeft,
    CurrentVolumeRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreRegister {
    PitchModulation(Half),
    Noise(Half),
    DryLeftGates(Half),
    WetLeftGates(Half),
    DryRightGates(Half),
    WetRightGates(Half),
    MixerGates,
    Attr,
    IrqAddress(Half),
    KeyOn(Half),
    KeyOff(Half),
    TransferAddress(Half),
    DataPort,
    AutoDma,
    EffectsStart(Half),
    EffectsOffset(ReverbOffset, Half),
    EffectsEnd,
    EndFlags(Half),
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRegister {
    MasterVolume(Channel),
    EffectsVolume(Channel),
    ExternalVolume(Channel),
    InputVolume(Channel),
    CurrentMasterVolume(Channel),
    Coefficient(ReverbCoefficient),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Voice { core: usize, voice: usize, param: VoiceParam },
    VoiceAddress { core: usize, voice: usize, address: VoiceAddress, half: Half },
    Core { core: usize, register: CoreRegister },
    Output { core: usize, register: OutputRegister },
    IrqInfo,
    /// Stored in the register shadow only
    Unmapped,
}

fn half(odd_word: bool) -> Half {
    if odd_word { Half::Low } else { Half::High }
}

// Bit-mask register pairs put the low 16 voices first
fn mask_half(odd_word: bool) -> Half {
    if odd_word { Half::High } else { Half::Low }
}

pub fn decode(address: u32) -> Register {
    let address = address & 0x7FE;

    if address >= SPDIF_BLOCK_START {
        return if address == IRQ_INFO_ADDRESS { Register::IrqInfo } else { Register::Unmapped };
    }

    if address >= OUTPUT_BLOCK_START {
        let relative = address - OUTPUT_BLOCK_START;
        let core = (relative / OUTPUT_BLOCK_CORE_SIZE) as usize;
        if core > 1 {
            return Register::Unmapped;
        }

        let index = ((relative % OUTPUT_BLOCK_CORE_SIZE) / 2) as usize;
        let channel = if index % 2 == 0 { Channel::Left } else { Channel::Right };
        let register = match index {
            0..=1 => OutputRegister::MasterVolume(channel),
            2..=3 => OutputRegister::EffectsVolume(channel),
            4..=5 => OutputRegister::ExternalVolume(channel),
            6..=7 => OutputRegister::InputVolume(channel),
            8..=9 => OutputRegister::CurrentMasterVolume(channel),
            _ => OutputRegister::Coefficient(ReverbCoefficient::ALL[index - 10]),
        };
        return Register::Output { core, register };
    }

    let core = (address / CORE_SIZE) as usize;
    let offset = address % CORE_SIZE;

    match offset {
        0x000..=0x17F => {
            let voice = (offset >> 4) as usize;
            let param = match (offset >> 1) & 7 {
                0 => VoiceParam::VolumeLeft,
                1 => VoiceParam::VolumeRight,
                2 => VoiceParam::Pitch,
                3 => VoiceParam::Adsr1,
                4 => VoiceParam::Adsr2,
                5 => VoiceParam::Envelope,
                6 => VoiceParam::CurrentVolumeLeft,
                7 => VoiceParam::CurrentVolumeRight,
                _ => unreachable!("value & 7 is always <= 7"),
            };
            Register::Voice { core, voice, param }
        }
        0x180..=0x1BF => {
            let odd_word = offset & 2 != 0;
            let register = match offset & !2 {
                0x180 => CoreRegister::PitchModulation(mask_half(odd_word)),
                0x184 => CoreRegister::Noise(mask_half(odd_word)),
                0x188 => CoreRegister::DryLeftGates(mask_half(odd_word)),
                0x18C => CoreRegister::WetLeftGates(mask_half(odd_word)),
                0x190 => CoreRegister::DryRightGates(mask_half(odd_word)),
                0x194 => CoreRegister::WetRightGates(mask_half(odd_word)),
                0x198 => {
                    if odd_word {
                        CoreRegister::Attr
                    } else {
                        CoreRegister::MixerGates
                    }
                }
                0x19C => CoreRegister::IrqAddress(half(odd_word)),
                0x1A0 => CoreRegister::KeyOn(mask_half(odd_word)),
                0x1A4 => CoreRegister::KeyOff(mask_half(odd_word)),
                0x1A8 => CoreRegister::TransferAddress(half(odd_word)),
                0x1AC if !odd_word => CoreRegister::DataPort,
                0x1B0 if !odd_word => CoreRegister::AutoDma,
                _ => return Register::Unmapped,
            };
            Register::Core { core, register }
        }
        0x1C0..=0x2DF => {
            let relative = offset - 0x1C0;
            let voice = (relative / 0xC) as usize;
            let (address, half) = match (relative % 0xC) / 2 {
                0 => (VoiceAddress::Start, Half::High),
                1 => (VoiceAddress::Start, Half::Low),
                2 => (VoiceAddress::LoopStart, Half::High),
                3 => (VoiceAddress::LoopStart, Half::Low),
                4 => (VoiceAddress::Next, Half::High),
                5 => (VoiceAddress::Next, Half::Low),
                _ => unreachable!("(value % 12) / 2 is always <= 5"),
            };
            Register::VoiceAddress { core, voice, address, half }
        }
        0x2E0 => Register::Core { core, register: CoreRegister::EffectsStart(Half::High) },
        0x2E2 => Register::Core { core, register: CoreRegister::EffectsStart(Half::Low) },
        0x2E4..=0x33B => {
            let relative = offset - 0x2E4;
            let reverb_offset = ReverbOffset::ALL[(relative / 4) as usize];
            Register::Core {
                core,
                register: CoreRegister::EffectsOffset(reverb_offset, half(relative & 2 != 0)),
            }
        }
        0x33C => Register::Core { core, register: CoreRegister::EffectsEnd },
        0x340 => Register::Core { core, register: CoreRegister::EndFlags(Half::Low) },
        0x342 => Register::Core { core, register: CoreRegister::EndFlags(Half::High) },
        0x344 => Register::Core { core, register: CoreRegister::Status },
        _ => Register::Unmapped,
    }
}
