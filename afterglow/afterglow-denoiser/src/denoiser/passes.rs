//! Records the per-frame kernel sequence into an encoder.

use render_api::Extent;

use crate::config::DenoiserConfig;
use crate::device::{Bindings, DenoiseDevice};
use crate::error::DenoiseResult;
use crate::kernel::{flags, Kernel, KernelParams, Slot};
use crate::resources::FrameImages;

use super::DenoiseInputs;

pub(crate) struct PassRecorder<'a, D: DenoiseDevice> {
    device: &'a D,
    encoder: &'a mut D::Encoder,
    config: &'a DenoiserConfig,
    extent: Extent,
}

impl<'a, D: DenoiseDevice> PassRecorder<'a, D> {
    pub fn new(device: &'a D, encoder: &'a mut D::Encoder, config: &'a DenoiserConfig, extent: Extent) -> Self {
        Self { device, encoder, config, extent }
    }

    fn params(&self, extent: Extent) -> KernelParams {
        let cfg = self.config;
        KernelParams {
            history_limit: cfg.history_limit as f32,
            antilag_scale: cfg.antilag.scale,
            phi_luminance: cfg.phi_luminance,
            phi_albedo: cfg.phi_albedo,
            phi_depth: cfg.phi_depth,
            downsample: cfg.antilag.downsample,
            spatial_variance_frames: cfg.spatial_variance_frames as f32,
            ..KernelParams::for_extent(extent)
        }
    }

    fn dispatch(&mut self, kernel: Kernel, bindings: Bindings<'_, D::Image>, params: KernelParams) -> DenoiseResult<()> {
        self.device.dispatch(self.encoder, kernel, &bindings, &params)
    }

    /// Keep this frame's inputs in the bundle; next frame reads them as "previous".
    pub fn capture(&mut self, inputs: &DenoiseInputs<'_, D::Image>, images: &FrameImages<D::Image>) -> DenoiseResult<()> {
        self.device.copy_image(self.encoder, inputs.radiance, &images.radiance)?;
        self.device.copy_image(self.encoder, inputs.albedo, &images.albedo)?;
        self.device.copy_image(self.encoder, inputs.visibility, &images.visibility)
    }

    pub fn clear_history(&mut self, images: &FrameImages<D::Image>) -> DenoiseResult<()> {
        let params = self.params(self.extent);
        self.dispatch(Kernel::Clear, Bindings::new().with(Slot::Output, &images.accum_color), params)?;
        self.dispatch(Kernel::Clear, Bindings::new().with(Slot::Output, &images.accum_moments), params)
    }

    /// Antilag gradients into `images.gradient`.
    pub fn gradient(
        &mut self,
        samples: &D::Image,
        previous: &FrameImages<D::Image>,
        images: &FrameImages<D::Image>,
        gradient_extent: Extent,
    ) -> DenoiseResult<()> {
        let params = KernelParams {
            source_extent: [self.extent.width, self.extent.height],
            ..self.params(gradient_extent)
        };
        self.dispatch(
            Kernel::Gradient,
            Bindings::new()
                .with(Slot::GradientSamples, samples)
                .with(Slot::PrevRadiance, &previous.radiance)
                .with(Slot::Output, &images.diff_temp[0]),
            params,
        )?;
        let iterations = self.config.antilag.filter_radius;
        if iterations == 0 {
            return self.device.copy_image(self.encoder, &images.diff_temp[0], &images.gradient);
        }
        let mut src = &images.diff_temp[0];
        for i in 0..iterations {
            let dst = if i + 1 == iterations { &images.gradient } else { &images.diff_temp[(i as usize + 1) % 2] };
            self.dispatch(
                Kernel::GradientAtrous,
                Bindings::new().with(Slot::Input, src).with(Slot::Output, dst),
                KernelParams { step: stride(i), ..params },
            )?;
            src = dst;
        }
        Ok(())
    }

    pub fn temporal(
        &mut self,
        inputs: &DenoiseInputs<'_, D::Image>,
        use_gradient: bool,
        previous: &FrameImages<D::Image>,
        images: &FrameImages<D::Image>,
    ) -> DenoiseResult<()> {
        let mut params = self.params(self.extent);
        if inputs.motion.is_some() {
            params.flags |= flags::USE_MOTION;
        }
        if use_gradient {
            params.flags |= flags::USE_GRADIENT;
        }
        self.dispatch(
            Kernel::Temporal,
            Bindings::new()
                .with(Slot::Radiance, &images.radiance)
                .with(Slot::Visibility, &images.visibility)
                .with_optional(Slot::Motion, inputs.motion)
                .with(Slot::PrevAccumColor, &previous.accum_color)
                .with(Slot::PrevAccumMoments, &previous.accum_moments)
                .with(Slot::PrevVisibility, &previous.visibility)
                .with_optional(Slot::Gradient, use_gradient.then_some(&images.gradient))
                .with(Slot::AccumColor, &images.accum_color)
                .with(Slot::AccumMoments, &images.accum_moments),
            params,
        )
    }

    /// Variance estimate into `temp_a`.
    pub fn variance(&mut self, images: &FrameImages<D::Image>) -> DenoiseResult<()> {
        let params = self.params(self.extent);
        self.dispatch(
            Kernel::Variance,
            Bindings::new()
                .with(Slot::AccumColor, &images.accum_color)
                .with(Slot::AccumMoments, &images.accum_moments)
                .with(Slot::Visibility, &images.visibility)
                .with(Slot::Output, &images.temp_a),
            params,
        )
    }

    /// À-trous passes over `temp_a`/`temp_b`, tapping history after the configured pass.
    /// Returns the image holding the final result.
    pub fn spatial<'i>(&mut self, images: &'i FrameImages<D::Image>) -> DenoiseResult<&'i D::Image> {
        let iterations = self.config.atrous_iterations;
        let tap = self.config.history_tap();
        let targets = [&images.temp_a, &images.temp_b];
        let params = self.params(self.extent);
        for i in 0..iterations {
            let (src, dst) = (targets[i as usize % 2], targets[(i as usize + 1) % 2]);
            self.dispatch(
                Kernel::Atrous,
                Bindings::new()
                    .with(Slot::Input, src)
                    .with(Slot::Visibility, &images.visibility)
                    .with(Slot::Albedo, &images.albedo)
                    .with(Slot::Output, dst),
                KernelParams { step: stride(i), ..params },
            )?;
            if tap == Some(i) {
                self.dispatch(
                    Kernel::HistoryTap,
                    Bindings::new()
                        .with(Slot::Input, dst)
                        .with(Slot::AccumMoments, &images.accum_moments)
                        .with(Slot::AccumColor, &images.accum_color),
                    params,
                )?;
            }
        }
        Ok(if iterations == 0 { &images.accum_color } else { targets[iterations as usize % 2] })
    }

    pub fn visualize(&mut self, input: &D::Image, mode: u32, scale: f32, output: &D::Image) -> DenoiseResult<()> {
        let params = KernelParams { debug_mode: mode, visualize_scale: scale, ..self.params(self.extent) };
        self.dispatch(Kernel::Visualize, Bindings::new().with(Slot::Input, input).with(Slot::Output, output), params)
    }

    pub fn clear(&mut self, output: &D::Image) -> DenoiseResult<()> {
        let params = self.params(self.extent);
        self.dispatch(Kernel::Clear, Bindings::new().with(Slot::Output, output), params)
    }
}

fn stride(iteration: u32) -> u32 {
    1u32 << iteration.min(31)
}
