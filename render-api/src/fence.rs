//! Fence contract used by the frame-resource pool. The pool only ever polls.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Opaque handle that reports when a submitted GPU batch has finished executing.
pub trait GpuFence: Send + Sync + Debug {
    /// Non-blocking status query.
    fn is_complete(&self) -> bool;
}

/// Host-visible fence: an atomic flag flipped by whoever observes completion
/// (a queue completion callback, or the CPU backend after executing a batch).
/// Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct HostFence {
    signaled: Arc<AtomicBool>,
}

impl HostFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fence that is already complete (e.g. for work that was never submitted).
    pub fn signaled() -> Self {
        let fence = Self::new();
        fence.signal();
        fence
    }

    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }

    /// True when both handles observe the same flag.
    pub fn same_as(&self, other: &HostFence) -> bool {
        Arc::ptr_eq(&self.signaled, &other.signaled)
    }
}

impl GpuFence for HostFence {
    fn is_complete(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
}
