//! Frame resources: the images one frame of denoiser state lives in, plus the fence
//! guarding them. One bundle per frame in flight, owned by the frame pool.

use render_api::Extent;

use crate::device::{DenoiseDevice, ImageDesc};
use crate::error::{DenoiseError, DenoiseResult};
use crate::pool::FrameBundle;

/// Full-resolution and gradient-resolution images of one bundle.
pub struct FrameImages<I> {
    /// Copies of this frame's integrator output; read back as "previous" next frame.
    pub radiance: I,
    pub albedo: I,
    pub visibility: I,
    /// rgb = accumulated colour, a = history length.
    pub accum_color: I,
    /// (m1, m2, history length, 0).
    pub accum_moments: I,
    /// Ping-pong spatial filter targets; a = variance.
    pub temp_a: I,
    pub temp_b: I,
    pub debug: I,
    /// Antilag gradients at 1/downsample resolution.
    pub gradient: I,
    pub diff_temp: [I; 2],
}

pub struct FrameResources<D: DenoiseDevice> {
    fence: Option<D::Fence>,
    frame_number: u64,
    extent: Option<Extent>,
    gradient_extent: Option<Extent>,
    images: Option<FrameImages<D::Image>>,
}

impl<D: DenoiseDevice> Default for FrameResources<D> {
    fn default() -> Self {
        Self { fence: None, frame_number: 0, extent: None, gradient_extent: None, images: None }
    }
}

impl<D: DenoiseDevice> FrameResources<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)allocate every image for `extent` unless they already match.
    /// Returns true when a new set was allocated.
    pub fn ensure_size(&mut self, device: &D, extent: Extent, downsample: u32) -> DenoiseResult<bool> {
        if extent.is_empty() {
            return Err(DenoiseError::ZeroExtent);
        }
        let gradient_extent = extent.downsampled(downsample);
        if self.images.is_some() && self.extent == Some(extent) && self.gradient_extent == Some(gradient_extent) {
            return Ok(false);
        }
        log::debug!(
            "allocating frame images {} (gradient {}) for frame {}",
            extent,
            gradient_extent,
            self.frame_number
        );
        let full = |label| device.create_image(&ImageDesc::new(label, extent));
        let low = |label| device.create_image(&ImageDesc::new(label, gradient_extent));
        let images = FrameImages {
            radiance: full("afterglow.radiance")?,
            albedo: full("afterglow.albedo")?,
            visibility: full("afterglow.visibility")?,
            accum_color: full("afterglow.accum_color")?,
            accum_moments: full("afterglow.accum_moments")?,
            temp_a: full("afterglow.temp_a")?,
            temp_b: full("afterglow.temp_b")?,
            debug: full("afterglow.debug")?,
            gradient: low("afterglow.gradient")?,
            diff_temp: [low("afterglow.diff_temp0")?, low("afterglow.diff_temp1")?],
        };
        self.images = Some(images);
        self.extent = Some(extent);
        self.gradient_extent = Some(gradient_extent);
        Ok(true)
    }

    pub fn extent(&self) -> Option<Extent> {
        self.extent
    }

    pub fn gradient_extent(&self) -> Option<Extent> {
        self.gradient_extent
    }

    pub fn images(&self) -> Option<&FrameImages<D::Image>> {
        self.images.as_ref()
    }
}

impl<D: DenoiseDevice> FrameBundle for FrameResources<D> {
    type Fence = D::Fence;

    fn fence(&self) -> Option<&D::Fence> {
        self.fence.as_ref()
    }

    fn set_fence(&mut self, fence: D::Fence) {
        self.fence = Some(fence);
    }

    fn frame_number(&self) -> u64 {
        self.frame_number
    }

    fn set_frame_number(&mut self, frame_number: u64) {
        self.frame_number = frame_number;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuDevice;

    #[test]
    fn ensure_size_allocates_once_per_extent() {
        let device = CpuDevice::new();
        let mut frame = FrameResources::<CpuDevice>::new();
        assert!(frame.ensure_size(&device, Extent::new(8, 4), 3).unwrap());
        assert!(!frame.ensure_size(&device, Extent::new(8, 4), 3).unwrap());
        assert_eq!(frame.gradient_extent(), Some(Extent::new(3, 2)));
        assert!(frame.ensure_size(&device, Extent::new(4, 4), 3).unwrap());
        assert_eq!(frame.extent(), Some(Extent::new(4, 4)));
        let images = frame.images().unwrap();
        assert_eq!(device.image_extent(&images.temp_b), Extent::new(4, 4));
        assert_eq!(device.image_extent(&images.diff_temp[1]), Extent::new(2, 2));
    }

    #[test]
    fn zero_extent_is_rejected() {
        let device = CpuDevice::new();
        let mut frame = FrameResources::<CpuDevice>::new();
        let err = frame.ensure_size(&device, Extent::new(0, 16), 1).unwrap_err();
        assert!(matches!(err, DenoiseError::ZeroExtent));
        assert!(frame.images().is_none());
    }

    #[test]
    fn out_of_memory_propagates() {
        // Eight full-size images at 4x4 need 128 texels.
        let device = CpuDevice::new().with_memory_budget(100);
        let mut frame = FrameResources::<CpuDevice>::new();
        let err = frame.ensure_size(&device, Extent::new(4, 4), 2).unwrap_err();
        assert!(err.is_allocation_failure());
        assert!(frame.extent().is_none());
    }
}
