//! Resampling filters. All of them produce output at twice the sample scale, matching the
//! `x << 1` headroom that volume application expects.

use spu2_config::InterpolationMode;

const HERMITE_TENSION: i64 = 16384;

/// `history` holds the four most recent samples, newest first. `position` is the fractional
/// sample position in 0.12 fixed point relative to the newest sample, in `-4095..=0`.
#[must_use]
pub fn interpolate(mode: InterpolationMode, history: &[i32; 4], position: i32) -> i32 {
    let [pv1, pv2, pv3, pv4] = history.map(i64::from);
    let position = i64::from(position);
    let mu = position + 4096;

    let sample = match mode {
        InterpolationMode::Nearest => pv1 << 1,
        InterpolationMode::Linear => (pv1 << 1) - (((pv2 - pv1) * position) >> 11),
        InterpolationMode::Cubic => cubic(pv4, pv3, pv2, pv1, mu),
        InterpolationMode::Hermite => hermite(pv4, pv3, pv2, pv1, mu),
        InterpolationMode::CatmullRom => catmull_rom(pv4, pv3, pv2, pv1, mu),
    };

    sample as i32
}

fn cubic(y0: i64, y1: i64, y2: i64, y3: i64, mu: i64) -> i64 {
    let a0 = y3 - y2 - y0 + y1;
    let a1 = y0 - y1 - a0;
    let a2 = y2 - y0;

    let mut value = (a0 * mu) >> 12;
    value = ((value + a1) * mu) >> 12;
    value = ((value + a2) * mu) >> 11;

    value + (y1 << 1)
}

fn hermite(y0: i64, y1: i64, y2: i64, y3: i64, mu: i64) -> i64 {
    let m0 = (((y1 - y0) * HERMITE_TENSION) >> 16) + (((y2 - y1) * HERMITE_TENSION) >> 16);
    let m1 = (((y2 - y1) * HERMITE_TENSION) >> 16) + (((y3 - y2) * HERMITE_TENSION) >> 16);

    let mut value = ((2 * y1 + m0 + m1 - 2 * y2) * mu) >> 12;
    value = ((value - 3 * y1 - 2 * m0 - m1 + 3 * y2) * mu) >> 12;
    value = ((value + m0) * mu) >> 11;

    value + (y1 << 1)
}

fn catmull_rom(y0: i64, y1: i64, y2: i64, y3: i64, mu: i64) -> i64 {
    let a3 = -y0 + 3 * y1 - 3 * y2 + y3;
    let a2 = 2 * y0 - 5 * y1 + 4 * y2 - y3;
    let a1 = -y0 + y2;
    let a0 = 2 * y1;

    let mut value = (a3 * mu) >> 12;
    value = ((a2 + value) * mu) >> 12;
    value = ((a1 + value) * mu) >> 12;

    a0 + value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_ignores_position() {
        let history = [100, 200, 300, 400];
        assert_eq!(interpolate(InterpolationMode::Nearest, &history, 0), 200);
        assert_eq!(interpolate(InterpolationMode::Nearest, &history, -2048), 200);
    }

    #[test]
    fn linear_blends_newest_two() {
        let history = [1000, 0, 0, 0];
        assert_eq!(interpolate(InterpolationMode::Linear, &history, 0), 2000);
        assert_eq!(interpolate(InterpolationMode::Linear, &history, -2048), 1000);
        assert_eq!(interpolate(InterpolationMode::Linear, &history, -4096), 0);
    }

    #[test]
    fn four_tap_filters_pass_through_constant_signal() {
        let history = [5000; 4];
        for mode in [InterpolationMode::Cubic, InterpolationMode::Hermite, InterpolationMode::CatmullRom] {
            for position in [0, -1, -1024, -2048, -4095] {
                assert_eq!(interpolate(mode, &history, position), 10000, "{mode} at {position}");
            }
        }
    }

    #[test]
    fn four_tap_filters_hit_sample_points() {
        // The four-tap filters run one sample behind: the segment spans the second and third
        // newest samples
        let history = [400, 300, 200, 100];
        for mode in [InterpolationMode::Cubic, InterpolationMode::Hermite, InterpolationMode::CatmullRom] {
            assert_eq!(interpolate(mode, &history, 0), 600, "{mode}");
        }
        assert_eq!(interpolate(InterpolationMode::CatmullRom, &history, -4095), 400);
    }

    #[test]
    fn extreme_inputs_do_not_overflow() {
        let history = [i32::from(i16::MAX), i32::from(i16::MIN), i32::from(i16::MAX), i32::from(i16::MIN)];
        for mode in InterpolationMode::ALL {
            let _ = interpolate(mode, &history, -2048);
        }
    }
}
