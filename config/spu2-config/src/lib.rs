use bincode::{Decode, Encode};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Resampling filter used when a voice's pitch does not map 1:1 onto the output rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum InterpolationMode {
    Nearest,
    Linear,
    Cubic,
    Hermite,
    #[default]
    CatmullRom,
}

impl InterpolationMode {
    pub const ALL: [Self; 5] =
        [Self::Nearest, Self::Linear, Self::Cubic, Self::Hermite, Self::CatmullRom];

    /// Whether the filter reads the two oldest history samples in addition to the newest two.
    #[inline]
    #[must_use]
    pub fn is_four_tap(self) -> bool {
        matches!(self, Self::Cubic | Self::Hermite | Self::CatmullRom)
    }
}

impl Display for InterpolationMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nearest => "Nearest",
            Self::Linear => "Linear",
            Self::Cubic => "Cubic",
            Self::Hermite => "Hermite",
            Self::CatmullRom => "CatmullRom",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("invalid interpolation mode: '{0}'")]
pub struct ParseInterpolationModeError(String);

impl FromStr for InterpolationMode {
    type Err = ParseInterpolationModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseInterpolationModeError(s.into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Spu2Config {
    pub interpolation: InterpolationMode,
    /// When disabled, cores output only their dry path and the reverb work area is left untouched
    pub effects_enabled: bool,
    /// Log ADPCM cache statistics every N output samples; 0 disables
    pub cache_stats_interval: u32,
}

impl Default for Spu2Config {
    fn default() -> Self {
        Self {
            interpolation: InterpolationMode::default(),
            effects_enabled: true,
            cache_stats_interval: 0,
        }
    }
}
