//! Keyed-recycling pool of per-frame bundles.
//!
//! Each `advance` hands out a "current" bundle and remembers the one handed out by
//! the call before as "previous". Any other bundle whose fence has signalled is free
//! for reuse. The pool polls fences and never waits on them, so the CPU can run
//! ahead of the GPU by as many frames as it likes; the pool grows instead.

use render_api::GpuFence;

/// Pool size past which growth is reported; usually means fences never signal.
const GROWTH_WARNING: usize = 8;

/// Minimal capability set a bundle needs to live in a [`FrameResourcePool`].
pub trait FrameBundle {
    type Fence: GpuFence;

    fn fence(&self) -> Option<&Self::Fence>;
    fn set_fence(&mut self, fence: Self::Fence);
    fn frame_number(&self) -> u64;
    fn set_frame_number(&mut self, frame_number: u64);

    /// Free for reuse: never handed out, or its GPU work has completed.
    fn is_reclaimable(&self) -> bool {
        self.fence().map_or(true, GpuFence::is_complete)
    }
}

#[derive(Debug)]
pub struct FrameResourcePool<T> {
    bundles: Vec<T>,
    current: Option<usize>,
    previous: Option<usize>,
}

impl<T> Default for FrameResourcePool<T> {
    fn default() -> Self {
        Self { bundles: Vec::new(), current: None, previous: None }
    }
}

impl<T: FrameBundle> FrameResourcePool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance with default-constructed bundles.
    pub fn advance(&mut self, fence: T::Fence) -> &mut T
    where
        T: Default,
    {
        match self.advance_with(fence, || Ok::<T, std::convert::Infallible>(T::default())) {
            Ok(bundle) => bundle,
            Err(never) => match never {},
        }
    }

    /// Make the current bundle "previous" and hand out a new current one, allocating
    /// through `allocate` when no free bundle exists. On allocation failure the pool is
    /// left exactly as it was.
    pub fn advance_with<E>(
        &mut self,
        fence: T::Fence,
        allocate: impl FnOnce() -> Result<T, E>,
    ) -> Result<&mut T, E> {
        let previous = self.current;
        let reusable = self
            .bundles
            .iter()
            .enumerate()
            .position(|(index, bundle)| Some(index) != previous && bundle.is_reclaimable());
        let index = match reusable {
            Some(index) => index,
            None => {
                let bundle = allocate()?;
                self.bundles.push(bundle);
                if self.bundles.len() > GROWTH_WARNING {
                    log::warn!(
                        "frame pool grew to {} bundles; submitted fences are not signalling",
                        self.bundles.len()
                    );
                }
                self.bundles.len() - 1
            }
        };
        let frame_number = previous.map_or(0, |p| self.bundles[p].frame_number() + 1);
        self.previous = previous;
        self.current = Some(index);
        let bundle = &mut self.bundles[index];
        bundle.set_frame_number(frame_number);
        bundle.set_fence(fence);
        Ok(bundle)
    }

    pub fn current(&self) -> Option<&T> {
        self.current.map(|i| &self.bundles[i])
    }

    pub fn previous(&self) -> Option<&T> {
        self.previous.map(|i| &self.bundles[i])
    }

    /// Current and previous together, for recording work that reads one and writes the other.
    pub fn frames(&self) -> (Option<&T>, Option<&T>) {
        (self.current(), self.previous())
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Bundles whose GPU work has not completed yet.
    pub fn in_flight(&self) -> usize {
        self.bundles.iter().filter(|b| !b.is_reclaimable()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.bundles.iter()
    }

    /// Drop every bundle. The caller must have drained the GPU first.
    pub fn clear(&mut self) {
        self.bundles.clear();
        self.current = None;
        self.previous = None;
    }
}
