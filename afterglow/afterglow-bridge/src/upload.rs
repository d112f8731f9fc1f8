//! Device-side copies of an integrator frame, reused while the extent holds.

use afterglow_denoiser::{DenoiseDevice, DenoiseInputs, DenoiseResult, ImageDesc};
use render_api::{Extent, IntegratorFrame, ViewRecord};

pub struct FrameUploads<D: DenoiseDevice> {
    extent: Extent,
    gradient_extent: Extent,
    radiance: D::Image,
    albedo: D::Image,
    visibility: D::Image,
    motion: Option<D::Image>,
    gradient: Option<D::Image>,
    has_motion: bool,
    has_gradient: bool,
    /// Denoised result is copied here so it outlives the frame bundle.
    output: D::Image,
}

impl<D: DenoiseDevice> FrameUploads<D> {
    /// Reuse `existing` when it matches, otherwise allocate a new set.
    pub fn ensure_size(device: &D, existing: Option<Self>, extent: Extent, downsample: u32) -> DenoiseResult<Self> {
        let gradient_extent = extent.downsampled(downsample);
        if let Some(uploads) = existing {
            if uploads.extent == extent && uploads.gradient_extent == gradient_extent {
                return Ok(uploads);
            }
        }
        log::debug!("allocating upload images for {extent}");
        let image = |label| device.create_image(&ImageDesc::new(label, extent));
        Ok(Self {
            extent,
            gradient_extent,
            radiance: image("afterglow.upload.radiance")?,
            albedo: image("afterglow.upload.albedo")?,
            visibility: image("afterglow.upload.visibility")?,
            motion: None,
            gradient: None,
            has_motion: false,
            has_gradient: false,
            output: image("afterglow.output")?,
        })
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn output(&self) -> &D::Image {
        &self.output
    }

    /// Write every plane of `frame`. Optional planes are allocated on first use.
    pub fn write(&mut self, device: &D, frame: &IntegratorFrame) -> DenoiseResult<()> {
        device.write_image(&self.radiance, &frame.radiance)?;
        device.write_image(&self.albedo, &frame.albedo)?;
        device.write_image(&self.visibility, &frame.visibility_texels())?;
        self.has_motion = write_optional(
            device,
            &mut self.motion,
            ImageDesc::new("afterglow.upload.motion", self.extent),
            frame.motion_texels(),
        )?;
        self.has_gradient = write_optional(
            device,
            &mut self.gradient,
            ImageDesc::new("afterglow.upload.gradient", self.gradient_extent),
            frame.gradient_texels(),
        )?;
        Ok(())
    }

    pub fn inputs<'a>(&'a self, views: &'a [ViewRecord]) -> DenoiseInputs<'a, D::Image> {
        let mut inputs = DenoiseInputs::new(&self.radiance, &self.albedo, &self.visibility, views);
        if let (true, Some(motion)) = (self.has_motion, &self.motion) {
            inputs = inputs.with_motion(motion);
        }
        if let (true, Some(gradient)) = (self.has_gradient, &self.gradient) {
            inputs = inputs.with_gradient_samples(gradient);
        }
        inputs
    }
}

fn write_optional<D: DenoiseDevice>(
    device: &D,
    slot: &mut Option<D::Image>,
    desc: ImageDesc,
    texels: Option<Vec<[f32; 4]>>,
) -> DenoiseResult<bool> {
    let Some(texels) = texels else { return Ok(false) };
    if slot.is_none() {
        *slot = Some(device.create_image(&desc)?);
    }
    if let Some(image) = slot {
        device.write_image(image, &texels)?;
    }
    Ok(true)
}
