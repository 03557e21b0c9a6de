use std::ops::RangeInclusive;

pub trait GetBit {
    #[must_use]
    fn bit(self, i: u8) -> bool;

    #[must_use]
    fn bits(self, range: RangeInclusive<u8>) -> Self;
}

macro_rules! impl_get_bit {
    ($t:ty) => {
        impl GetBit for $t {
            #[inline]
            fn bit(self, i: u8) -> bool {
                debug_assert!(i < (<$t>::BITS as u8));
                self & (1 << i) != 0
            }

            #[inline]
            fn bits(self, range: RangeInclusive<u8>) -> Self {
                let start = *range.start();
                let end = *range.end();
                debug_assert!(end < (<$t>::BITS as u8));

                (self >> start) & ((1 << (end - start + 1)) - 1)
            }
        }
    };
}

impl_get_bit!(u8);
impl_get_bit!(u16);
impl_get_bit!(u32);

/// Access to the 16-bit halves of the 20- and 24-bit SPU2 registers, which the bus exposes as
/// pairs of 16-bit ports
pub trait U32Ext {
    fn low_word(self) -> u16;

    fn high_word(self) -> u16;

    fn set_low_word(&mut self, value: u16);

    fn set_high_word(&mut self, value: u16);
}

impl U32Ext for u32 {
    #[inline(always)]
    fn low_word(self) -> u16 {
        self as u16
    }

    #[inline(always)]
    fn high_word(self) -> u16 {
        (self >> 16) as u16
    }

    #[inline(always)]
    fn set_low_word(&mut self, value: u16) {
        *self = (*self & 0xFFFF_0000) | u32::from(value);
    }

    #[inline(always)]
    fn set_high_word(&mut self, value: u16) {
        *self = (*self & 0x0000_FFFF) | (u32::from(value) << 16);
    }
}

pub trait I32Ext {
    fn clamp_to_i16(self) -> i16;
}

impl I32Ext for i32 {
    #[inline(always)]
    fn clamp_to_i16(self) -> i16 {
        self.clamp(i16::MIN.into(), i16::MAX.into()) as i16
    }
}

impl I32Ext for i64 {
    #[inline(always)]
    fn clamp_to_i16(self) -> i16 {
        self.clamp(i16::MIN.into(), i16::MAX.into()) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_ranges() {
        assert!(0x8000_u16.bit(15));
        assert!(!0x8000_u16.bit(14));
        assert_eq!(0x7F00_u16.bits(8..=14), 0x7F);
        assert_eq!(0x1FC0_u16.bits(6..=12), 0x7F);
    }

    #[test]
    fn word_halves() {
        let mut address = 0x000F_FFF8_u32;
        address.set_high_word(0x0002);
        assert_eq!(address, 0x0002_FFF8);

        address.set_low_word(0x1230);
        assert_eq!(address, 0x0002_1230);
        assert_eq!(address.high_word(), 0x0002);
        assert_eq!(address.low_word(), 0x1230);
    }

    #[test]
    fn clamping() {
        assert_eq!(40000_i32.clamp_to_i16(), i16::MAX);
        assert_eq!((-40000_i32).clamp_to_i16(), i16::MIN);
        assert_eq!(1234_i32.clamp_to_i16(), 1234);
        assert_eq!(i64::MIN.clamp_to_i16(), i16::MIN);
    }
}
