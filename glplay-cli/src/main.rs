use std::{io, path::PathBuf, time::Duration};

use clap::Parser;
use glplay::{
    backend::{
        allocator::{
            gbm::{GbmAllocator, GbmDevice, GbmImage},
            Buffer, Image,
        },
        drm::{enumerate, Adapter, AdapterConfig, DrmDevice, DrmDeviceFd},
        renderer::{sync::FenceHandle, Renderer},
    },
};
use tracing::{info, warn};

/// Animate all active outputs of a kms device through atomic commits
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device node to drive, defaults to the first primary node found
    #[arg(short, long)]
    device: Option<PathBuf>,
    /// Scanout buffers per output
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(3..))]
    buffers: u64,
    /// Never pass fences to the kernel, wait for the GPU on the CPU instead
    #[arg(long)]
    no_explicit_fencing: bool,
    /// Time a frame has to be ready before its predicted completion
    #[arg(long, default_value_t = 4)]
    margin_ms: u64,
    /// Deviation of the predicted completion time worth a warning
    #[arg(long, default_value_t = 1000)]
    drift_tolerance_us: u64,
    /// Frames after which the animation repeats
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    animation_period: u64,
    /// Log filter used if `RUST_LOG` is not set
    #[arg(long, default_value = "info")]
    log: String,
}

impl Cli {
    fn config(&self) -> AdapterConfig {
        AdapterConfig {
            ring_depth: self.buffers as usize,
            margin: Duration::from_millis(self.margin_ms),
            drift_tolerance: Duration::from_micros(self.drift_tolerance_us),
            animation_period: self.animation_period,
            explicit_fencing: !self.no_explicit_fencing,
        }
    }
}

/// Fills the whole buffer with a color fading along the animation period
///
/// Writes happen through a cpu mapping, so no fence is ever returned.
#[derive(Debug)]
struct FillRenderer {
    gbm: GbmDevice<DrmDeviceFd>,
    period: u64,
}

impl FillRenderer {
    fn color(&self, frame: u64) -> [u8; 4] {
        let half = (self.period / 2).max(1);
        let step = if frame < half { frame } else { self.period - frame };
        let level = (step.min(half) * 255 / half) as u8;
        // XRGB8888 is stored little endian
        [level, 0x40, 255 - level, 0xff]
    }
}

impl Renderer for FillRenderer {
    type Image = GbmImage;
    type Error = io::Error;

    fn render_into(
        &mut self,
        buffer: &mut Buffer<GbmImage>,
        frame: u64,
    ) -> Result<Option<FenceHandle>, io::Error> {
        let pixel = self.color(frame);
        let image = buffer.image_mut();
        let (width, height) = image.size();
        let res = image.bo_mut().map_mut(&self.gbm, 0, 0, width, height, |map| {
            let stride = map.stride() as usize;
            let row_len = width as usize * 4;
            for row in map.buffer_mut().chunks_mut(stride).take(height as usize) {
                for px in row[..row_len].chunks_exact_mut(4) {
                    px.copy_from_slice(&pixel);
                }
            }
        });
        match res {
            Ok(res) => res.map(|_| None),
            Err(err) => Err(io::Error::new(io::ErrorKind::Other, err)),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log))
            .init();
    }

    let config = cli.config();
    let device = match &cli.device {
        Some(path) => DrmDevice::open(path)?,
        None => DrmDevice::open_default()?,
    };

    let mut allocator = GbmAllocator::new(&device)?;
    let mut outputs = Vec::new();
    for target in enumerate::active_outputs(&device)? {
        let name = target.name.clone();
        match enumerate::create_output(&device, target, &mut allocator, &config) {
            Ok(output) => outputs.push(output),
            Err(err) => warn!(%name, %err, "Skipping output"),
        }
    }

    let renderer = FillRenderer {
        gbm: allocator.device().clone(),
        period: config.animation_period,
    };
    let mut adapter = Adapter::new(device, renderer, outputs, &config)?;
    info!(outputs = adapter.outputs().len(), "Starting repaint loop");
    adapter.run()?;
    info!("Exiting");
    Ok(())
}
