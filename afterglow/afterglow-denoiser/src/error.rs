//! Central error type for denoiser operations.
//!
//! Everything here is fatal for the frame: allocation failures, device loss and
//! programming errors in how the caller wired its inputs. History invalidation is
//! never an error.

use render_api::Extent;

use crate::kernel::{Kernel, Slot};

#[derive(thiserror::Error, Debug)]
pub enum DenoiseError {
    #[error("image extent must be non-zero")]
    ZeroExtent,

    #[error("out of device memory ({requested} texels requested)")]
    OutOfMemory { requested: usize },

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("{name} is {actual}, expected {expected}")]
    ExtentMismatch { name: &'static str, expected: Extent, actual: Extent },

    #[error("{kernel:?}: required binding {slot:?} missing")]
    MissingBinding { kernel: Kernel, slot: Slot },

    #[error("{kernel:?}: {slot:?} is both read and written in one dispatch")]
    Hazard { kernel: Kernel, slot: Slot },

    #[error("readback error: {0}")]
    Readback(String),

    #[error("device error: {0}")]
    Device(String),
}

impl DenoiseError {
    pub fn device<T: ToString>(msg: T) -> Self {
        DenoiseError::Device(msg.to_string())
    }

    pub fn allocation<T: ToString>(msg: T) -> Self {
        DenoiseError::Allocation(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        DenoiseError::Readback(msg.to_string())
    }

    /// Allocation failures cannot be retried mid-frame.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, DenoiseError::OutOfMemory { .. } | DenoiseError::Allocation(_) | DenoiseError::ZeroExtent)
    }
}

pub type DenoiseResult<T> = Result<T, DenoiseError>;
