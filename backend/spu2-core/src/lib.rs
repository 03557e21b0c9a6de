//! Emulation of the PlayStation 2 sound processor (SPU2): two cores of 24 ADPCM voices each, with
//! per-voice envelopes, a reverb unit per core, and a sample-accurate output mixer

mod adpcm;
pub mod api;
mod irq;
mod memory;
mod mixer;
mod noise;
mod registers;
mod reverb;
mod voice;
mod volume;

pub use api::{Spu2, Spu2Error, Spu2Result, VoiceStatus};
pub use memory::{DYNAMIC_MEMORY_LINE, SOUND_RAM_WORDS};
pub use spu2_config::{InterpolationMode, Spu2Config};
pub use voice::EnvelopePhase;
