//! Minimal wgpu init (no window). Builds every denoiser pipeline and runs two frames.

use std::sync::Arc;

use afterglow_bridge::DenoisedRenderer;
use afterglow_denoiser::gpu::WgpuDevice;
use debug::ToyScene;
use render_api::{Extent, RenderBackend, ViewRecord};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let device = pollster::block_on(async {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .ok_or_else(|| anyhow::anyhow!("no adapter"))?;
        let (device, queue) = adapter.request_device(&wgpu::DeviceDescriptor::default(), None).await?;
        anyhow::Ok(WgpuDevice::new(device, queue)?)
    })?;

    let extent = Extent::new(64, 64);
    let views = [ViewRecord::identity(extent)];
    let mut renderer = DenoisedRenderer::new(Arc::new(device), ToyScene::new(extent));
    for _ in 0..2 {
        renderer.render_frame(&views)?;
    }
    let (_, texels) = renderer.read_output()?;
    anyhow::ensure!(texels.iter().all(|t| t.iter().all(|v| v.is_finite())), "non-finite output");
    println!("Afterglow minimal_wgpu: OK");
    Ok(())
}
