//! The denoiser: frame pool + history control + the SVGF kernel sequence.
//!
//! `denoise` records into the caller's encoder and never blocks. The returned image
//! lives in the current frame bundle and stays valid until the bundle is recycled,
//! which cannot happen before the frame's fence signals.

mod passes;

use std::sync::Arc;

use render_api::{Extent, ViewRecord};

use crate::config::{DebugView, DenoiserConfig};
use crate::device::DenoiseDevice;
use crate::error::{DenoiseError, DenoiseResult};
use crate::history::{HistoryControl, HistoryQuery, InvalidationReason};
use crate::kernel::visualize;
use crate::pool::{FrameBundle, FrameResourcePool};
use crate::resources::FrameResources;

use passes::PassRecorder;

/// Per-frame integrator output, already resident on the device.
#[derive(Debug)]
pub struct DenoiseInputs<'a, I> {
    pub radiance: &'a I,
    pub albedo: &'a I,
    pub visibility: &'a I,
    /// Previous-frame UV per pixel.
    pub motion: Option<&'a I>,
    /// Antilag strata at `extent.downsampled(antilag.downsample)`.
    pub gradient_samples: Option<&'a I>,
    pub views: &'a [ViewRecord],
}

impl<'a, I> DenoiseInputs<'a, I> {
    pub fn new(radiance: &'a I, albedo: &'a I, visibility: &'a I, views: &'a [ViewRecord]) -> Self {
        Self { radiance, albedo, visibility, motion: None, gradient_samples: None, views }
    }

    pub fn with_motion(mut self, motion: &'a I) -> Self {
        self.motion = Some(motion);
        self
    }

    pub fn with_gradient_samples(mut self, samples: &'a I) -> Self {
        self.gradient_samples = Some(samples);
        self
    }
}

#[derive(Debug)]
pub struct DenoisedFrame<'a, I> {
    pub image: &'a I,
    pub frame_number: u64,
    pub history_valid: bool,
    pub accumulated_frames: u32,
    pub invalidation: Option<InvalidationReason>,
}

pub struct Denoiser<D: DenoiseDevice> {
    device: Arc<D>,
    config: DenoiserConfig,
    pool: FrameResourcePool<FrameResources<D>>,
    history: HistoryControl,
}

impl<D: DenoiseDevice> Denoiser<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self::with_config(device, DenoiserConfig::default())
    }

    pub fn with_config(device: Arc<D>, config: DenoiserConfig) -> Self {
        Self { device, config, pool: FrameResourcePool::new(), history: HistoryControl::new() }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &DenoiserConfig {
        &self.config
    }

    /// Changes apply from the next `denoise` call.
    pub fn config_mut(&mut self) -> &mut DenoiserConfig {
        &mut self.config
    }

    pub fn set_config(&mut self, config: DenoiserConfig) {
        self.config = config;
    }

    /// Discard accumulated history on the next frame.
    pub fn request_reset(&mut self) {
        self.history.request_reset();
    }

    pub fn accumulated_frames(&self) -> u32 {
        self.history.accumulated_frames()
    }

    pub fn current_frame(&self) -> Option<u64> {
        self.pool.current().map(FrameBundle::frame_number)
    }

    pub fn previous_frame(&self) -> Option<u64> {
        self.pool.previous().map(FrameBundle::frame_number)
    }

    /// Images of the bundle handed out by the last `denoise` call.
    pub fn current_resources(&self) -> Option<&FrameResources<D>> {
        self.pool.current()
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Bundles whose work has not completed yet.
    pub fn frames_in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    /// Block until all submitted work has executed.
    pub fn drain(&self) -> DenoiseResult<()> {
        self.device.wait_idle()
    }

    /// Drain, then free every frame bundle. The next frame starts cold.
    pub fn release_resources(&mut self) -> DenoiseResult<()> {
        self.device.wait_idle()?;
        log::debug!("releasing {} frame bundles", self.pool.len());
        self.pool.clear();
        Ok(())
    }

    /// Record one frame of denoising. `fence` must be the fence the caller submits
    /// `encoder` with.
    pub fn denoise(
        &mut self,
        encoder: &mut D::Encoder,
        fence: D::Fence,
        inputs: DenoiseInputs<'_, D::Image>,
    ) -> DenoiseResult<DenoisedFrame<'_, D::Image>> {
        let cfg = self.config.sanitized();
        let device = &*self.device;
        let extent = device.image_extent(inputs.radiance);
        if extent.is_empty() {
            return Err(DenoiseError::ZeroExtent);
        }
        let downsample = cfg.antilag.downsample;
        let gradient_extent = extent.downsampled(downsample);
        check_extent(device, "albedo", inputs.albedo, extent)?;
        check_extent(device, "visibility", inputs.visibility, extent)?;
        if let Some(motion) = inputs.motion {
            check_extent(device, "motion", motion, extent)?;
        }
        if let Some(samples) = inputs.gradient_samples {
            check_extent(device, "gradient samples", samples, gradient_extent)?;
        }

        device.poll();
        self.pool
            .advance_with(fence, || {
                let mut frame = FrameResources::new();
                frame.ensure_size(device, extent, downsample)?;
                Ok::<_, DenoiseError>(frame)
            })?
            .ensure_size(device, extent, downsample)?;

        let decision = self.history.evaluate(&HistoryQuery {
            extent,
            previous_extent: self.pool.previous().and_then(FrameResources::extent),
            views: inputs.views,
            has_motion: inputs.motion.is_some(),
            accumulation_key: cfg.debug_view.accumulation_key(),
        });

        let (Some(current), previous) = self.pool.frames() else {
            return Err(DenoiseError::device("frame pool has no current bundle"));
        };
        let images = current.images().ok_or_else(|| DenoiseError::allocation("frame images missing"))?;
        let mut recorder = PassRecorder::new(device, encoder, &cfg, extent);
        recorder.capture(&inputs, images)?;

        let previous_images = previous.and_then(FrameResources::images);
        let image = match (decision.is_valid(), previous_images) {
            (true, Some(prev)) => {
                let use_gradient = cfg.antilag.enabled && inputs.gradient_samples.is_some();
                if let (true, Some(samples)) = (use_gradient, inputs.gradient_samples) {
                    recorder.gradient(samples, prev, images, gradient_extent)?;
                }
                recorder.temporal(&inputs, use_gradient, prev, images)?;
                if cfg.atrous_iterations > 0 || cfg.debug_view == DebugView::Variance {
                    recorder.variance(images)?;
                }
                if cfg.debug_view == DebugView::Variance {
                    recorder.visualize(&images.temp_a, visualize::ALPHA, 1.0, &images.debug)?;
                }
                let filtered = recorder.spatial(images)?;
                match cfg.debug_view {
                    DebugView::Off | DebugView::Integrator(_) => filtered,
                    DebugView::Variance => &images.debug,
                    DebugView::HistoryLength => {
                        let scale = 1.0 / cfg.history_limit as f32;
                        recorder.visualize(&images.accum_color, visualize::ALPHA, scale, &images.debug)?;
                        &images.debug
                    }
                    DebugView::Gradient => {
                        if use_gradient {
                            recorder.visualize(&images.gradient, visualize::GRADIENT, 1.0, &images.debug)?;
                        } else {
                            recorder.clear(&images.debug)?;
                        }
                        &images.debug
                    }
                }
            }
            _ => {
                recorder.clear_history(images)?;
                &images.radiance
            }
        };

        log::trace!(
            "frame {}: history {} ({} accumulated), pool {}",
            current.frame_number(),
            if decision.is_valid() { "valid" } else { "invalid" },
            decision.accumulated_frames,
            self.pool.len()
        );
        Ok(DenoisedFrame {
            image,
            frame_number: current.frame_number(),
            history_valid: decision.is_valid(),
            accumulated_frames: decision.accumulated_frames,
            invalidation: decision.invalidation,
        })
    }
}

fn check_extent<D: DenoiseDevice>(device: &D, name: &'static str, image: &D::Image, expected: Extent) -> DenoiseResult<()> {
    let actual = device.image_extent(image);
    if actual != expected {
        return Err(DenoiseError::ExtentMismatch { name, expected, actual });
    }
    Ok(())
}
