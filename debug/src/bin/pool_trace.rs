//! Prints how the frame resource pool grows and recycles when the device completes work
//! `--lag` submissions late.

use std::sync::Arc;

use afterglow_bridge::DenoisedRenderer;
use afterglow_denoiser::cpu::CpuDevice;
use clap::Parser;
use debug::ToyScene;
use render_api::{Extent, RenderBackend, ViewRecord};

#[derive(Parser, Debug)]
#[command(name = "pool_trace", about = "Trace frame pool behaviour under delayed fences")]
struct Args {
    #[arg(long, default_value = "24")]
    frames: u64,

    /// Submissions kept in flight before the oldest completes.
    #[arg(long, default_value = "2")]
    lag: usize,

    /// Frame at which the lag drops to zero (all work completes).
    #[arg(long)]
    drain_at: Option<u64>,

    #[arg(long, default_value = "32")]
    size: u32,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let extent = Extent::new(args.size, args.size);
    let device = Arc::new(CpuDevice::new().with_deferred_fences());
    let mut renderer = DenoisedRenderer::new(Arc::clone(&device), ToyScene::new(extent));
    let views = [ViewRecord::identity(extent)];

    println!("{:>5} {:>7} {:>6} {:>9} {:>6} {:>5}", "frame", "bundle", "valid", "accum", "pool", "busy");
    for frame in 0..args.frames {
        let lag = if args.drain_at.is_some_and(|at| frame >= at) { 0 } else { args.lag };
        while device.pending_fences() > lag {
            device.complete_oldest();
        }
        let report = renderer.render_frame(&views)?;
        println!(
            "{:>5} {:>7} {:>6} {:>9} {:>6} {:>5}",
            frame,
            report.frame_number,
            report.history_valid,
            report.accumulated_frames,
            report.pool_size,
            renderer.denoiser().frames_in_flight()
        );
    }
    device.complete_pending();
    Ok(())
}
