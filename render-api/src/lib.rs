//! Shared render API for Afterglow.
//! Defines the per-frame data integrators hand to the denoiser, the fence contract
//! used by the frame-resource pool, and the producer/backend traits the host drives.

mod backend;
mod extract;
mod fence;

pub use backend::{FrameProducer, FrameReport, RenderBackend};
pub use extract::{luminance, Extent, GradientSample, IntegratorFrame, ViewRecord, VisibilityRecord};
pub use fence::{GpuFence, HostFence};
