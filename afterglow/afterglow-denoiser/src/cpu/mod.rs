//! CPU reference backend.
//!
//! Images are shared host planes. An encoder records commands; `submit` runs them in
//! order and then signals the fence. With deferred fences the signal is held back until
//! `complete_pending`/`complete_oldest`, which is how frames in flight are modelled
//! without a GPU.

mod kernels;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use render_api::{Extent, HostFence};

use crate::device::{Bindings, DenoiseDevice, ImageDesc};
use crate::error::{DenoiseError, DenoiseResult};
use crate::kernel::{Kernel, KernelParams, Slot};

type Texel = [f32; 4];

#[derive(Debug)]
struct Budget {
    limit: usize,
    used: AtomicUsize,
}

#[derive(Debug)]
struct Lease {
    budget: Arc<Budget>,
    texels: usize,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.budget.used.fetch_sub(self.texels, Ordering::AcqRel);
    }
}

impl Budget {
    fn reserve(self: &Arc<Self>, texels: usize) -> DenoiseResult<Lease> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(texels).filter(|total| *total <= self.limit)
            })
            .map_err(|_| DenoiseError::OutOfMemory { requested: texels })?;
        Ok(Lease { budget: Arc::clone(self), texels })
    }
}

#[derive(Debug)]
struct Storage {
    texels: RwLock<Vec<Texel>>,
    _lease: Option<Lease>,
}

/// Host-resident RGBA32F image. Clones share storage.
#[derive(Clone)]
pub struct CpuImage {
    label: &'static str,
    extent: Extent,
    storage: Arc<Storage>,
}

impl std::fmt::Debug for CpuImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuImage").field("label", &self.label).field("extent", &self.extent).finish()
    }
}

impl CpuImage {
    pub fn same_image(&self, other: &CpuImage) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    fn read(&self) -> DenoiseResult<RwLockReadGuard<'_, Vec<Texel>>> {
        self.storage.texels.read().map_err(|_| DenoiseError::device("image storage poisoned"))
    }

    fn store(&self, texels: Vec<Texel>) -> DenoiseResult<()> {
        let mut guard = self.storage.texels.write().map_err(|_| DenoiseError::device("image storage poisoned"))?;
        *guard = texels;
        Ok(())
    }
}

enum Command {
    Dispatch { kernel: Kernel, reads: Vec<(Slot, CpuImage)>, writes: Vec<CpuImage>, params: KernelParams },
    Copy { src: CpuImage, dst: CpuImage },
}

pub struct CpuEncoder {
    label: &'static str,
    commands: Vec<Command>,
}

#[derive(Debug, Default)]
pub struct CpuDevice {
    budget: Option<Arc<Budget>>,
    deferred_fences: bool,
    pending: Mutex<Vec<HostFence>>,
    dispatches: AtomicU64,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submissions leave their fence unsignalled until completed explicitly.
    pub fn with_deferred_fences(mut self) -> Self {
        self.deferred_fences = true;
        self
    }

    /// Cap live image storage at `texels`; allocations beyond it fail with `OutOfMemory`.
    pub fn with_memory_budget(mut self, texels: usize) -> Self {
        self.budget = Some(Arc::new(Budget { limit: texels, used: AtomicUsize::new(0) }));
        self
    }

    /// Signal every pending fence; returns how many were signalled.
    pub fn complete_pending(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let count = pending.len();
        for fence in pending.drain(..) {
            fence.signal();
        }
        count
    }

    /// Signal the oldest pending fence, if any.
    pub fn complete_oldest(&self) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_empty() {
            return false;
        }
        pending.remove(0).signal();
        true
    }

    pub fn pending_fences(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Kernel dispatches executed so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    pub fn allocated_texels(&self) -> usize {
        self.budget.as_ref().map_or(0, |b| b.used.load(Ordering::Acquire))
    }

    fn execute(&self, command: Command) -> DenoiseResult<()> {
        match command {
            Command::Copy { src, dst } => {
                if src.same_image(&dst) {
                    return Ok(());
                }
                let texels = src.read()?.clone();
                dst.store(texels)
            }
            Command::Dispatch { kernel, reads, writes, params } => {
                let guards = reads
                    .iter()
                    .map(|(slot, image)| Ok((*slot, image.extent, image.read()?)))
                    .collect::<DenoiseResult<Vec<_>>>()?;
                let views = guards
                    .iter()
                    .map(|(slot, extent, texels)| (*slot, kernels::View { extent: *extent, texels: texels.as_slice() }))
                    .collect();
                let outputs = kernels::run(kernel, &kernels::Inputs::new(kernel, views), &params)?;
                drop(guards);
                for (image, texels) in writes.iter().zip(outputs) {
                    image.store(texels)?;
                }
                self.dispatches.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }
}

impl DenoiseDevice for CpuDevice {
    type Image = CpuImage;
    type Fence = HostFence;
    type Encoder = CpuEncoder;

    fn create_image(&self, desc: &ImageDesc) -> DenoiseResult<CpuImage> {
        if desc.extent.is_empty() {
            return Err(DenoiseError::ZeroExtent);
        }
        let count = desc.extent.texel_count();
        let lease = self.budget.as_ref().map(|b| b.reserve(count)).transpose()?;
        Ok(CpuImage {
            label: desc.label,
            extent: desc.extent,
            storage: Arc::new(Storage { texels: RwLock::new(vec![[0.0; 4]; count]), _lease: lease }),
        })
    }

    fn image_extent(&self, image: &CpuImage) -> Extent {
        image.extent
    }

    fn create_encoder(&self, label: &'static str) -> CpuEncoder {
        CpuEncoder { label, commands: Vec::new() }
    }

    fn dispatch(
        &self,
        encoder: &mut CpuEncoder,
        kernel: Kernel,
        bindings: &Bindings<'_, CpuImage>,
        params: &KernelParams,
    ) -> DenoiseResult<()> {
        bindings.validate(kernel)?;
        let layout = kernel.layout();
        let reads: Vec<(Slot, CpuImage)> = layout
            .reads
            .iter()
            .filter_map(|(slot, _)| bindings.get(*slot).map(|image| (*slot, image.clone())))
            .collect();
        let mut writes = Vec::with_capacity(layout.writes.len());
        for &slot in layout.writes {
            let image = bindings.get(slot).ok_or(DenoiseError::MissingBinding { kernel, slot })?;
            if image.extent != params.extent() {
                return Err(DenoiseError::ExtentMismatch {
                    name: kernel.label(),
                    expected: params.extent(),
                    actual: image.extent,
                });
            }
            if reads.iter().any(|(_, read)| read.same_image(image)) {
                return Err(DenoiseError::Hazard { kernel, slot });
            }
            writes.push(image.clone());
        }
        log::trace!("{}: record {} ({})", encoder.label, kernel.label(), params.extent());
        encoder.commands.push(Command::Dispatch { kernel, reads, writes, params: *params });
        Ok(())
    }

    fn copy_image(&self, encoder: &mut CpuEncoder, src: &CpuImage, dst: &CpuImage) -> DenoiseResult<()> {
        if src.extent != dst.extent {
            return Err(DenoiseError::ExtentMismatch { name: dst.label, expected: src.extent, actual: dst.extent });
        }
        encoder.commands.push(Command::Copy { src: src.clone(), dst: dst.clone() });
        Ok(())
    }

    fn submit(&self, encoder: CpuEncoder, fence: &HostFence) -> DenoiseResult<()> {
        log::trace!("{}: submit {} commands", encoder.label, encoder.commands.len());
        for command in encoder.commands {
            self.execute(command)?;
        }
        if self.deferred_fences {
            self.pending.lock().unwrap_or_else(PoisonError::into_inner).push(fence.clone());
        } else {
            fence.signal();
        }
        Ok(())
    }

    fn wait_idle(&self) -> DenoiseResult<()> {
        self.complete_pending();
        Ok(())
    }

    fn write_image(&self, image: &CpuImage, texels: &[Texel]) -> DenoiseResult<()> {
        if texels.len() != image.extent.texel_count() {
            return Err(DenoiseError::device(format!(
                "upload of {} texels into {} image {}",
                texels.len(),
                image.extent,
                image.label
            )));
        }
        image.store(texels.to_vec())
    }

    fn read_image(&self, image: &CpuImage) -> DenoiseResult<Vec<Texel>> {
        Ok(image.read()?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_api::GpuFence;

    #[test]
    fn reading_and_writing_one_image_is_a_hazard() {
        let device = CpuDevice::new();
        let image = device.create_image(&ImageDesc::new("a", Extent::new(2, 2))).unwrap();
        let mut encoder = device.create_encoder("test");
        let bindings = Bindings::new().with(Slot::Input, &image).with(Slot::Output, &image);
        let err = device
            .dispatch(&mut encoder, Kernel::Visualize, &bindings, &KernelParams::for_extent(Extent::new(2, 2)))
            .unwrap_err();
        assert!(matches!(err, DenoiseError::Hazard { slot: Slot::Output, .. }));
    }

    #[test]
    fn work_runs_in_order_on_submit() {
        let device = CpuDevice::new();
        let extent = Extent::new(2, 1);
        let a = device.create_image(&ImageDesc::new("a", extent)).unwrap();
        let b = device.create_image(&ImageDesc::new("b", extent)).unwrap();
        device.write_image(&a, &[[1.0, 2.0, 3.0, 4.0]; 2]).unwrap();
        let mut encoder = device.create_encoder("test");
        device.copy_image(&mut encoder, &a, &b).unwrap();
        device
            .dispatch(&mut encoder, Kernel::Clear, &Bindings::new().with(Slot::Output, &a), &KernelParams::for_extent(extent))
            .unwrap();
        assert_eq!(device.read_image(&b).unwrap(), vec![[0.0; 4]; 2]);
        let fence = HostFence::new();
        device.submit(encoder, &fence).unwrap();
        assert!(fence.is_complete());
        assert_eq!(device.read_image(&b).unwrap(), vec![[1.0, 2.0, 3.0, 4.0]; 2]);
        assert_eq!(device.read_image(&a).unwrap(), vec![[0.0; 4]; 2]);
        assert_eq!(device.dispatch_count(), 1);
    }

    #[test]
    fn deferred_fences_wait_for_completion() {
        let device = CpuDevice::new().with_deferred_fences();
        let (first, second) = (HostFence::new(), HostFence::new());
        device.submit(device.create_encoder("one"), &first).unwrap();
        device.submit(device.create_encoder("two"), &second).unwrap();
        assert_eq!(device.pending_fences(), 2);
        assert!(device.complete_oldest());
        assert!(first.is_complete() && !second.is_complete());
        assert_eq!(device.complete_pending(), 1);
        assert!(second.is_complete());
    }

    #[test]
    fn budget_is_returned_when_images_drop() {
        let device = CpuDevice::new().with_memory_budget(16);
        let desc = ImageDesc::new("a", Extent::new(4, 4));
        let image = device.create_image(&desc).unwrap();
        assert!(matches!(device.create_image(&desc), Err(DenoiseError::OutOfMemory { requested: 16 })));
        drop(image);
        assert_eq!(device.allocated_texels(), 0);
        assert!(device.create_image(&desc).is_ok());
    }
}
