//! Render the toy scene for N frames, denoise, and write PNGs.
//!
//! `offline_denoise --frames 32 --out out/` writes `out/noisy.png` (last raw frame) and
//! `out/frame_NNNN.png` for every denoised frame.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use afterglow_bridge::DenoisedRenderer;
use afterglow_denoiser::{DenoiseDevice, DenoiserConfig};
use anyhow::Context;
use clap::Parser;
use debug::{to_rgb8, ToyScene};
use render_api::{Extent, HostFence, RenderBackend, ViewRecord};

#[derive(Parser, Debug)]
#[command(name = "offline_denoise", about = "Denoise a procedural noisy sequence to PNG files")]
struct Args {
    #[arg(long, default_value = "16")]
    frames: u64,

    #[arg(long, default_value = "256")]
    width: u32,

    #[arg(long, default_value = "256")]
    height: u32,

    /// Use the CPU reference device instead of wgpu.
    #[arg(long)]
    cpu: bool,

    #[arg(short, long, default_value = "afterglow-out")]
    out: PathBuf,

    #[arg(long, default_value = "1")]
    spp: u32,

    /// Light flicker period in frames (0 = steady).
    #[arg(long, default_value = "0")]
    flicker: u64,

    #[arg(long)]
    no_antilag: bool,

    /// Withhold motion vectors; history then resets whenever the camera moves.
    #[arg(long)]
    no_motion: bool,

    #[arg(long)]
    atrous_iterations: Option<u32>,

    #[arg(long)]
    history_limit: Option<u32>,

    /// Only write the last denoised frame.
    #[arg(long)]
    last_only: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let extent = Extent::new(args.width, args.height);
    anyhow::ensure!(!extent.is_empty(), "extent must be non-empty, got {extent}");

    let mut config = DenoiserConfig::from_env();
    config.antilag.enabled &= !args.no_antilag;
    if let Some(n) = args.atrous_iterations {
        config.atrous_iterations = n;
    }
    if let Some(n) = args.history_limit {
        config.history_limit = n;
    }

    std::fs::create_dir_all(&args.out).with_context(|| format!("creating {}", args.out.display()))?;
    if args.cpu {
        run(Arc::new(afterglow_denoiser::cpu::CpuDevice::new()), &args, extent, config)
    } else {
        let device = afterglow_denoiser::gpu::WgpuDevice::from_default_adapter()?;
        run(Arc::new(device), &args, extent, config)
    }
}

fn scene(args: &Args, extent: Extent, config: &DenoiserConfig) -> ToyScene {
    let gradients = config.antilag.enabled.then_some(config.antilag.downsample);
    ToyScene::new(extent)
        .with_samples_per_pixel(args.spp)
        .with_flicker(args.flicker)
        .with_gradients(gradients)
        .with_motion(!args.no_motion)
}

fn run<D>(device: Arc<D>, args: &Args, extent: Extent, config: DenoiserConfig) -> anyhow::Result<()>
where
    D: DenoiseDevice<Fence = HostFence>,
{
    let reference = scene(args, extent, &config);
    let mut renderer = DenoisedRenderer::new_with_config(device, scene(args, extent, &config), config);
    let views = [ViewRecord::identity(extent)];
    let started = std::time::Instant::now();
    for frame in 0..args.frames {
        let report = renderer.render_frame(&views)?;
        log::info!(
            "frame {frame}: bundle #{} history_valid={} accumulated={} pool={}",
            report.frame_number,
            report.history_valid,
            report.accumulated_frames,
            report.pool_size
        );
        if !args.last_only || frame + 1 == args.frames {
            let (extent, texels) = renderer.read_output()?;
            save(&args.out.join(format!("frame_{frame:04}.png")), extent, &texels)?;
        }
    }
    if let Some(last) = args.frames.checked_sub(1) {
        let raw = reference.render(last);
        save(&args.out.join("noisy.png"), raw.extent, &raw.radiance)?;
    }
    println!(
        "{} frames at {extent} in {:.2?}, written to {}",
        args.frames,
        started.elapsed(),
        args.out.display()
    );
    Ok(())
}

fn save(path: &Path, extent: Extent, texels: &[[f32; 4]]) -> anyhow::Result<()> {
    to_rgb8(extent, texels).save(path).with_context(|| format!("writing {}", path.display()))
}
