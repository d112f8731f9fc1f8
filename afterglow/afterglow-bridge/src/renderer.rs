//! DenoisedRenderer: produce, upload, denoise, submit. Implements RenderBackend for the host.

use std::sync::Arc;

use anyhow::Context;
use afterglow_denoiser::{DenoiseDevice, Denoiser, DenoiserConfig};
use render_api::{Extent, FrameProducer, FrameReport, HostFence, RenderBackend, ViewRecord};

use crate::upload::FrameUploads;

/// Owns the integrator, the denoiser and the upload images for one output.
pub struct DenoisedRenderer<P: FrameProducer, D: DenoiseDevice<Fence = HostFence>> {
    producer: P,
    device: Arc<D>,
    denoiser: Denoiser<D>,
    uploads: Option<FrameUploads<D>>,
    frame_index: u64,
}

impl<P: FrameProducer, D: DenoiseDevice<Fence = HostFence>> DenoisedRenderer<P, D> {
    pub fn new(device: Arc<D>, producer: P) -> Self {
        Self::new_with_config(device, producer, DenoiserConfig::default())
    }

    pub fn new_with_config(device: Arc<D>, producer: P, config: DenoiserConfig) -> Self {
        let denoiser = Denoiser::with_config(Arc::clone(&device), config);
        Self { producer, device, denoiser, uploads: None, frame_index: 0 }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn denoiser(&self) -> &Denoiser<D> {
        &self.denoiser
    }

    pub fn denoiser_mut(&mut self) -> &mut Denoiser<D> {
        &mut self.denoiser
    }

    pub fn producer_mut(&mut self) -> &mut P {
        &mut self.producer
    }

    /// Frames rendered so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Wait for the GPU and read back the last denoised frame.
    pub fn read_output(&self) -> anyhow::Result<(Extent, Vec<[f32; 4]>)> {
        let uploads = self.uploads.as_ref().context("no frame rendered yet")?;
        self.denoiser.drain()?;
        let texels = self.device.read_image(uploads.output()).context("reading denoised output")?;
        Ok((uploads.extent(), texels))
    }

    /// Drain and free every GPU resource. The next frame starts without history.
    pub fn release_resources(&mut self) -> anyhow::Result<()> {
        self.denoiser.release_resources()?;
        self.uploads = None;
        Ok(())
    }
}

impl<P: FrameProducer, D: DenoiseDevice<Fence = HostFence>> RenderBackend for DenoisedRenderer<P, D> {
    fn render_frame(&mut self, views: &[ViewRecord]) -> anyhow::Result<FrameReport> {
        let frame = self
            .producer
            .produce(views, self.frame_index)
            .with_context(|| format!("integrator failed on frame {}", self.frame_index))?;
        let downsample = self.denoiser.config().antilag.downsample.max(1);
        let device = &*self.device;
        let mut uploads = FrameUploads::ensure_size(device, self.uploads.take(), frame.extent, downsample)
            .context("allocating upload images")?;
        uploads.write(device, &frame).context("uploading integrator frame")?;

        let fence = HostFence::new();
        let mut encoder = device.create_encoder("afterglow.frame");
        let denoised = self.denoiser.denoise(&mut encoder, fence.clone(), uploads.inputs(views))?;
        device.copy_image(&mut encoder, denoised.image, uploads.output())?;
        let report = FrameReport {
            frame_number: denoised.frame_number,
            history_valid: denoised.history_valid,
            accumulated_frames: denoised.accumulated_frames,
            pool_size: self.denoiser.pool_len(),
        };
        device.submit(encoder, &fence)?;
        self.uploads = Some(uploads);
        self.frame_index += 1;
        Ok(report)
    }

    fn request_reset(&mut self) {
        self.denoiser.request_reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afterglow_denoiser::cpu::CpuDevice;
    use render_api::{IntegratorFrame, VisibilityRecord};

    struct Constant {
        extent: Extent,
        value: f32,
    }

    impl FrameProducer for Constant {
        type Error = std::convert::Infallible;

        fn produce(&mut self, _views: &[ViewRecord], _frame_index: u64) -> Result<IntegratorFrame, Self::Error> {
            let n = self.extent.texel_count();
            Ok(IntegratorFrame {
                extent: self.extent,
                radiance: vec![[self.value; 4]; n],
                albedo: vec![[1.0; 4]; n],
                visibility: vec![VisibilityRecord::new(0, 0, 1.0); n],
                motion: None,
                gradient_samples: None,
            })
        }
    }

    #[test]
    fn renders_and_reports_history() {
        let device = Arc::new(CpuDevice::new());
        let producer = Constant { extent: Extent::new(8, 8), value: 0.5 };
        let mut renderer = DenoisedRenderer::new(device, producer);
        let views = [ViewRecord::default()];
        let first = renderer.render_frame(&views).unwrap();
        assert!(!first.history_valid);
        let second = renderer.render_frame(&views).unwrap();
        assert_eq!(second.frame_number, 1);
        assert_eq!(second.accumulated_frames, 1);
        assert_eq!(second.pool_size, 2);
        let (extent, texels) = renderer.read_output().unwrap();
        assert_eq!(extent, Extent::new(8, 8));
        assert!(texels.iter().all(|t| t[0] == 0.5));
    }

    #[test]
    fn reset_and_resize_invalidate() {
        let device = Arc::new(CpuDevice::new());
        let mut renderer = DenoisedRenderer::new(device, Constant { extent: Extent::new(8, 8), value: 0.25 });
        let views = [ViewRecord::default()];
        renderer.render_frame(&views).unwrap();
        renderer.render_frame(&views).unwrap();
        renderer.request_reset();
        assert!(!renderer.render_frame(&views).unwrap().history_valid);
        renderer.producer_mut().extent = Extent::new(4, 8);
        assert!(!renderer.render_frame(&views).unwrap().history_valid);
        assert_eq!(renderer.read_output().unwrap().0, Extent::new(4, 8));
    }

    #[test]
    fn read_before_render_is_an_error() {
        let renderer = DenoisedRenderer::new(Arc::new(CpuDevice::new()), Constant { extent: Extent::new(2, 2), value: 0.0 });
        assert!(renderer.read_output().is_err());
    }
}
