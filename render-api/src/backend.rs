//! Traits the host drives each frame: integrators produce, backends denoise and submit.

use crate::{IntegratorFrame, ViewRecord};

/// An integrator (path tracer, BDPT, VCM, hybrid ray tracer) seen from the denoiser:
/// an external producer of per-pixel radiance/albedo/visibility/motion data.
pub trait FrameProducer {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produce the frame for `views`. `frame_index` increases by one per call.
    fn produce(&mut self, views: &[ViewRecord], frame_index: u64) -> Result<IntegratorFrame, Self::Error>;
}

/// What the backend did with one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub frame_number: u64,
    pub history_valid: bool,
    pub accumulated_frames: u32,
    /// Bundles currently owned by the frame-resource pool.
    pub pool_size: usize,
}

/// Render backend the host calls once per frame regardless of integrator or device.
pub trait RenderBackend {
    /// Produce, denoise and submit one frame. Does not wait for the GPU.
    fn render_frame(&mut self, views: &[ViewRecord]) -> anyhow::Result<FrameReport>;

    /// Drop accumulated history at the next frame ("reset accumulation").
    fn request_reset(&mut self);
}
