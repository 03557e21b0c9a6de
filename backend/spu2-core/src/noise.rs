//! Noise generator shared by every voice in noise mode

use bincode::{Decode, Encode};

const INITIAL_SEED: u32 = 0x4159_5321;

#[derive(Debug, Clone, Encode, Decode)]
pub struct NoiseGenerator {
    seed: u32,
}

impl NoiseGenerator {
    pub fn new() -> Self {
        Self { seed: INITIAL_SEED }
    }

    /// Return the current noise sample and step the generator.
    pub fn next_sample(&mut self) -> i32 {
        let sample = if self.seed & 0x100 != 0 {
            ((self.seed & 0xFF) << 8) as i32
        } else if self.seed & 0xFFFF != 0 {
            0x7FFF
        } else {
            0x8000
        };

        let a = self.seed.rotate_right(5) ^ 0x9A;
        let b = a.rotate_left(2).wrapping_add(a) ^ a;
        self.seed = b.rotate_right(3);

        sample
    }
}

impl Default for NoiseGenerator {
    fn default() -> Self {
        Self::new()
    }
}
