//! The command-recording layer the denoiser issues work into.

use std::fmt::Debug;

use render_api::{Extent, GpuFence};

use crate::error::{DenoiseError, DenoiseResult};
use crate::kernel::{Kernel, KernelParams, Requirement, Slot};

/// Description of one RGBA32F 2D image.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub label: &'static str,
    pub extent: Extent,
}

impl ImageDesc {
    pub fn new(label: &'static str, extent: Extent) -> Self {
        Self { label, extent }
    }
}

/// Images bound to one dispatch, keyed by slot.
#[derive(Debug)]
pub struct Bindings<'a, I> {
    entries: Vec<(Slot, &'a I)>,
}

impl<'a, I> Bindings<'a, I> {
    pub fn new() -> Self {
        Self { entries: Vec::with_capacity(8) }
    }

    pub fn with(mut self, slot: Slot, image: &'a I) -> Self {
        self.bind(slot, image);
        self
    }

    pub fn with_optional(mut self, slot: Slot, image: Option<&'a I>) -> Self {
        if let Some(image) = image {
            self.bind(slot, image);
        }
        self
    }

    pub fn bind(&mut self, slot: Slot, image: &'a I) {
        match self.entries.iter_mut().find(|(s, _)| *s == slot) {
            Some(entry) => entry.1 = image,
            None => self.entries.push((slot, image)),
        }
    }

    pub fn get(&self, slot: Slot) -> Option<&'a I> {
        self.entries.iter().find(|(s, _)| *s == slot).map(|(_, image)| *image)
    }

    /// Every required slot of `kernel` is bound.
    pub fn validate(&self, kernel: Kernel) -> DenoiseResult<()> {
        let layout = kernel.layout();
        let required = layout
            .reads
            .iter()
            .filter(|(_, req)| *req == Requirement::Required)
            .map(|(slot, _)| *slot)
            .chain(layout.writes.iter().copied());
        for slot in required {
            if self.get(slot).is_none() {
                return Err(DenoiseError::MissingBinding { kernel, slot });
            }
        }
        Ok(())
    }
}

impl<I> Default for Bindings<'_, I> {
    fn default() -> Self {
        Self::new()
    }
}

/// A backend able to allocate images, record the denoiser's kernels, and submit them.
///
/// Recording never blocks. `submit` hands the batch to the device and arranges for
/// `fence` to signal when it has executed; only `wait_idle` and `read_image` wait.
pub trait DenoiseDevice {
    type Image: Debug;
    type Fence: GpuFence + Clone;
    type Encoder;

    fn create_image(&self, desc: &ImageDesc) -> DenoiseResult<Self::Image>;
    fn image_extent(&self, image: &Self::Image) -> Extent;

    fn create_encoder(&self, label: &'static str) -> Self::Encoder;
    fn dispatch(
        &self,
        encoder: &mut Self::Encoder,
        kernel: Kernel,
        bindings: &Bindings<'_, Self::Image>,
        params: &KernelParams,
    ) -> DenoiseResult<()>;
    /// Full-image copy; extents must match.
    fn copy_image(&self, encoder: &mut Self::Encoder, src: &Self::Image, dst: &Self::Image) -> DenoiseResult<()>;

    fn submit(&self, encoder: Self::Encoder, fence: &Self::Fence) -> DenoiseResult<()>;
    /// Let completion callbacks run without waiting.
    fn poll(&self) {}
    fn wait_idle(&self) -> DenoiseResult<()>;

    /// Host upload, ordered before any work submitted afterwards.
    fn write_image(&self, image: &Self::Image, texels: &[[f32; 4]]) -> DenoiseResult<()>;
    /// Blocking readback of everything submitted so far.
    fn read_image(&self, image: &Self::Image) -> DenoiseResult<Vec<[f32; 4]>>;
}
