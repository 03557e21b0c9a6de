use bincode::{Decode, Encode};
use spu2_common::num::GetBit;

const ENVELOPE_MAX: i32 = 0x7FFF_FFFF;

// Above 75% of max, exponential attack and increasing sustain switch to a slower rate
const EXPONENTIAL_KNEE: i32 = 0x6000_0000;

const RATES: [i32; 160] = build_rate_table();

// Exponential decreases slow down as the level falls, indexed by the top 3 bits of the level
const EXPONENTIAL_OFFSETS: [usize; 8] = [0, 4, 6, 8, 9, 10, 11, 12];

const fn build_rate_table() -> [i32; 160] {
    let mut table = [0; 160];

    let mut i = 0;
    while i < table.len() {
        let shift = (i as i32 - 32) >> 2;
        let mut rate = ((i & 3) + 4) as i64;
        if shift < 0 {
            rate >>= -shift;
        } else {
            rate <<= shift;
        }

        if rate > 0x3FFF_FFFF {
            rate = 0x3FFF_FFFF;
        }
        table[i] = rate as i32;

        i += 1;
    }

    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Encode, Decode)]
pub enum EnvelopePhase {
    #[default]
    Off,
    Attack,
    Decay,
    Sustain,
    SustainEnd,
    Release,
    ReleaseEnd,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct Adsr {
    value: i32,
    phase: EnvelopePhase,
    releasing: bool,
    attack_exponential: bool,
    attack_rate: u8,
    decay_rate: u8,
    sustain_level: u8,
    sustain_exponential: bool,
    sustain_decrease: bool,
    sustain_rate: u8,
    release_exponential: bool,
    release_rate: u8,
}

impl Adsr {
    pub fn write_adsr1(&mut self, value: u16) {
        self.attack_exponential = value.bit(15);
        self.attack_rate = value.bits(8..=14) as u8;
        self.decay_rate = value.bits(4..=7) as u8;
        self.sustain_level = value.bits(0..=3) as u8;
    }

    pub fn read_adsr1(&self) -> u16 {
        (u16::from(self.attack_exponential) << 15)
            | (u16::from(self.attack_rate) << 8)
            | (u16::from(self.decay_rate) << 4)
            | u16::from(self.sustain_level)
    }

    pub fn write_adsr2(&mut self, value: u16) {
        self.sustain_exponential = value.bit(15);
        self.sustain_decrease = value.bit(14);
        self.sustain_rate = value.bits(6..=12) as u8;
        self.release_exponential = value.bit(5);
        self.release_rate = value.bits(0..=4) as u8;
    }

    pub fn read_adsr2(&self) -> u16 {
        (u16::from(self.sustain_exponential) << 15)
            | (u16::from(self.sustain_decrease) << 14)
            | (u16::from(self.sustain_rate) << 6)
            | (u16::from(self.release_exponential) << 5)
            | u16::from(self.release_rate)
    }

    pub fn write_envx(&mut self, value: u16) {
        let value = (i32::from(value) << 16) | i32::from(value);
        self.value = if value < 0 { ENVELOPE_MAX } else { value };
    }

    pub fn read_envx(&self) -> u16 {
        (self.value >> 16) as u16
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn phase(&self) -> EnvelopePhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != EnvelopePhase::Off
    }

    pub fn key_on(&mut self) {
        self.value = 1;
        self.phase = EnvelopePhase::Attack;
        self.releasing = false;
    }

    pub fn key_off(&mut self) {
        self.releasing = true;
    }

    pub fn stop(&mut self) {
        self.value = 0;
        self.phase = EnvelopePhase::Off;
    }

    /// Advance the envelope by one sample. Returns `false` if the envelope reached the end of
    /// its release on this step, in which case the voice is now off.
    #[must_use]
    pub fn step(&mut self) -> bool {
        debug_assert!(self.value >= 0, "negative envelope level {:08X}", self.value);

        if self.releasing && self.phase < EnvelopePhase::Release {
            self.phase = EnvelopePhase::Release;
        }

        match self.phase {
            EnvelopePhase::Off => {
                self.value = 0;
                return true;
            }
            EnvelopePhase::Attack => {
                if self.value == ENVELOPE_MAX {
                    self.phase = EnvelopePhase::Decay;
                } else {
                    let step = self.increase_step(self.attack_rate, self.attack_exponential);
                    self.increase(step, EnvelopePhase::Decay);
                }
            }
            EnvelopePhase::Decay => {
                let sustain_level = i32::from(self.sustain_level) << 27;
                let offset = self.exponential_offset();
                self.value -= RATES[((usize::from(self.decay_rate) ^ 0x1F) << 2) + 8 + offset];

                if self.value <= sustain_level {
                    self.value = if self.value < 0 { 0 } else { sustain_level };
                    self.phase = EnvelopePhase::Sustain;
                }
            }
            EnvelopePhase::Sustain => {
                let rate = usize::from(self.sustain_rate) ^ 0x7F;
                if self.sustain_decrease {
                    let index = if self.sustain_exponential {
                        rate + 5 + self.exponential_offset()
                    } else {
                        rate + 17
                    };
                    self.value -= RATES[index];

                    if self.value <= 0 {
                        self.value = 0;
                        self.phase = EnvelopePhase::SustainEnd;
                    }
                } else {
                    let step = self.increase_step(self.sustain_rate, self.sustain_exponential);
                    self.increase(step, EnvelopePhase::SustainEnd);
                }
            }
            EnvelopePhase::SustainEnd => {
                if self.sustain_decrease {
                    self.value = 0;
                    self.phase = EnvelopePhase::ReleaseEnd;
                } else {
                    self.value = ENVELOPE_MAX;
                }
            }
            EnvelopePhase::Release => {
                let rate = (usize::from(self.release_rate) ^ 0x1F) << 2;
                let index = if self.release_exponential {
                    rate + 8 + self.exponential_offset()
                } else {
                    rate + 20
                };
                self.value -= RATES[index];

                if self.value <= 0 {
                    self.value = 0;
                    self.phase = EnvelopePhase::ReleaseEnd;
                }
            }
            EnvelopePhase::ReleaseEnd => {
                self.value = 0;
            }
        }

        if self.phase == EnvelopePhase::ReleaseEnd {
            self.stop();
            return false;
        }

        true
    }

    fn increase_step(&self, rate: u8, exponential: bool) -> i32 {
        let rate = usize::from(rate) ^ 0x7F;
        if exponential && self.value >= EXPONENTIAL_KNEE { RATES[rate + 8] } else { RATES[rate + 16] }
    }

    fn increase(&mut self, step: i32, next_phase: EnvelopePhase) {
        match self.value.checked_add(step) {
            Some(value) => self.value = value,
            None => {
                self.value = ENVELOPE_MAX;
                self.phase = next_phase;
            }
        }
    }

    fn exponential_offset(&self) -> usize {
        EXPONENTIAL_OFFSETS[((self.value >> 28) & 7) as usize]
    }
}
