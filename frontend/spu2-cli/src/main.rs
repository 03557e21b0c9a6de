use anyhow::{Context, anyhow};
use clap::Parser;
use crc::Crc;
use env_logger::Env;
use serde::Deserialize;
use spu2_core::{InterpolationMode, Spu2, Spu2Config};
use std::fs;
use std::path::{Path, PathBuf};

const CRC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TraceEvent {
    Write { address: u32, value: u16 },
    Dma { core: usize, data: Vec<u16> },
    Tick { count: u32 },
}

#[derive(Debug, Parser)]
struct Args {
    /// JSON register trace to replay
    #[arg(short = 't', long)]
    trace_path: PathBuf,

    /// TOML config file; missing fields use their defaults
    #[arg(short = 'c', long)]
    config_path: Option<PathBuf>,

    /// Write interleaved little-endian 16-bit PCM to this file
    #[arg(short = 'o', long)]
    output_path: Option<PathBuf>,

    /// Interpolation mode, overriding the config file
    #[arg(long)]
    interpolation: Option<InterpolationMode>,

    /// Disable reverb processing, overriding the config file
    #[arg(long)]
    no_effects: bool,
}

impl Args {
    fn spu2_config(&self) -> anyhow::Result<Spu2Config> {
        let mut config = match &self.config_path {
            Some(path) => read_config(path)?,
            None => Spu2Config::default(),
        };

        if let Some(interpolation) = self.interpolation {
            config.interpolation = interpolation;
        }
        if self.no_effects {
            config.effects_enabled = false;
        }

        Ok(config)
    }
}

fn read_config(path: &Path) -> anyhow::Result<Spu2Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Unable to read config file '{}'", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Unable to parse config file '{}'", path.display()))
}

fn read_trace(path: &Path) -> anyhow::Result<Vec<TraceEvent>> {
    let trace_str = fs::read_to_string(path)
        .with_context(|| format!("Unable to read trace file '{}'", path.display()))?;
    serde_json::from_str(&trace_str)
        .with_context(|| format!("Unable to parse trace file '{}'", path.display()))
}

#[derive(Debug, Default)]
struct IrqCounts([u64; 2]);

impl IrqCounts {
    fn record(&mut self, raised: [bool; 2]) {
        for (count, raised) in self.0.iter_mut().zip(raised) {
            *count += u64::from(raised);
        }
    }
}

fn replay(spu2: &mut Spu2, trace: &[TraceEvent]) -> anyhow::Result<(Vec<(i16, i16)>, IrqCounts)> {
    let mut samples = Vec::new();
    let mut irqs = IrqCounts::default();

    for (i, event) in trace.iter().enumerate() {
        match event {
            &TraceEvent::Write { address, value } => spu2.write_register(address, value),
            TraceEvent::Dma { core, data } => {
                if *core > 1 {
                    return Err(anyhow!("Trace event {i}: invalid DMA core {core}"));
                }
                spu2.dma_write(*core, data);
            }
            &TraceEvent::Tick { count } => {
                for _ in 0..count {
                    spu2.tick(&mut samples).context("Error mixing sample")?;
                    irqs.record(spu2.take_irq());
                }
                continue;
            }
        }

        irqs.record(spu2.take_irq());
    }

    Ok((samples, irqs))
}

// Interleaved L/R in little-endian byte order
fn to_pcm(samples: &[(i16, i16)]) -> Vec<i16> {
    samples.iter().flat_map(|&(l, r)| [l.to_le(), r.to_le()]).collect()
}

fn write_pcm(path: &Path, pcm: &[i16]) -> anyhow::Result<()> {
    fs::write(path, bytemuck::cast_slice::<i16, u8>(pcm))
        .with_context(|| format!("Unable to write PCM output to '{}'", path.display()))
}

fn peak(samples: impl Iterator<Item = i16>) -> u16 {
    samples.map(i16::unsigned_abs).max().unwrap_or(0)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.spu2_config()?;
    log::info!("Running with config {config:?}");

    let trace = read_trace(&args.trace_path)?;
    log::info!("Loaded {} trace events from '{}'", trace.len(), args.trace_path.display());

    let mut spu2 = Spu2::new(config).context("Unable to create SPU2")?;
    let (samples, irqs) = replay(&mut spu2, &trace)?;

    let pcm = to_pcm(&samples);
    let checksum = CRC.checksum(bytemuck::cast_slice::<i16, u8>(&pcm));
    let peak_l = peak(samples.iter().map(|&(l, _)| l));
    let peak_r = peak(samples.iter().map(|&(_, r)| r));

    println!("Samples: {}", samples.len());
    println!("Peak L: {peak_l}, Peak R: {peak_r}");
    println!("IRQs: core 0 {}, core 1 {}", irqs.0[0], irqs.0[1]);
    println!("Checksum: {checksum:08X}");

    if let Some(output_path) = &args.output_path {
        write_pcm(output_path, &pcm)?;
        log::info!("Wrote PCM output to '{}'", output_path.display());
    }

    Ok(())
}
