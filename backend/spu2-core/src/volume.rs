//! Fixed-point volume helpers and the volume slide unit used by voice and master volumes

use bincode::{Decode, Encode};
use spu2_common::num::GetBit;

/// High word of the 64-bit product.
#[inline(always)]
#[must_use]
pub fn mul_shr32(a: i32, b: i32) -> i32 {
    ((i64::from(a) * i64::from(b)) >> 32) as i32
}

/// Scale a sample by a 32-bit volume multiplier, where 0x7FFF_FFFF is unity gain.
#[inline(always)]
#[must_use]
pub fn apply_volume(sample: i32, volume: i32) -> i32 {
    mul_shr32(sample << 1, volume)
}

/// Expand a 16-bit volume to a 32-bit multiplier, filling the low word so that 0x7FFF is
/// effectively unity gain.
#[inline]
#[must_use]
pub fn expand_volume(volume: u16) -> i32 {
    ((u32::from(volume) << 16) | u32::from(volume << 1)) as i32
}

/// A VOL register. Bit 15 clear sets a constant level; bit 15 set starts a slide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct VolumeSlide {
    register: u16,
    level: i16,
    sliding: bool,
    reverse_phase: bool,
    decrement: bool,
    exponential: bool,
    increment: u8,
}

impl VolumeSlide {
    pub fn new(register: u16) -> Self {
        let mut slide = Self::default();
        slide.write(register);
        slide
    }

    pub fn write(&mut self, value: u16) {
        self.register = value;

        if value.bit(15) {
            self.sliding = true;
            self.reverse_phase = value.bit(12);
            self.decrement = value.bit(13);
            self.exponential = value.bit(14);
            self.increment = (value & 0x7F) as u8;
        } else {
            self.sliding = false;
            self.level = (value << 1) as i16;
        }
    }

    pub fn register(&self) -> u16 {
        self.register
    }

    /// Current level, as read back through VOLX.
    pub fn level(&self) -> i16 {
        self.level
    }

    pub fn multiplier(&self) -> i32 {
        expand_volume(self.level as u16)
    }

    pub fn clock(&mut self) {
        if !self.sliding {
            return;
        }

        let mut level = i32::from(self.level).clamp(0, 0x7FFF);
        if self.reverse_phase {
            level = 0x7FFF - level;
        }

        let increment = i32::from(self.increment);
        if self.decrement {
            let step = if self.exponential { ((level * increment) >> 11).max(1) } else { increment };
            level -= step;
            if level <= 0 {
                level = 0;
                self.sliding = false;
            }
        } else {
            let step =
                if self.exponential { (increment >> (level >> 12)).max(1) } else { increment };
            level += step;
            if level >= 0x7FFF {
                level = 0x7FFF;
                self.sliding = false;
            }
        }

        if self.reverse_phase {
            level = 0x7FFF - level;
        }

        self.level = level as i16;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct StereoVolume {
    pub left: VolumeSlide,
    pub right: VolumeSlide,
}

impl StereoVolume {
    pub fn new(register: u16) -> Self {
        Self { left: VolumeSlide::new(register), right: VolumeSlide::new(register) }
    }

    pub fn clock(&mut self) {
        self.left.clock();
        self.right.clock();
    }
}

/// Constant 32-bit volume (EVOL, AVOL, BVOL)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct FixedVolume {
    pub left: i32,
    pub right: i32,
}

impl FixedVolume {
    pub const MAX: Self = Self { left: 0x7FFF_FFFF, right: 0x7FFF_FFFF };

    pub fn read_left(&self) -> u16 {
        (self.left >> 16) as u16
    }

    pub fn read_right(&self) -> u16 {
        (self.right >> 16) as u16
    }

    pub fn write_left(&mut self, value: u16) {
        self.left = expand_volume(value);
    }

    pub fn write_right(&mut self, value: u16) {
        self.right = expand_volume(value);
    }
}
