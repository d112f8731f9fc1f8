//! Afterglow denoiser: frame-resource pool + SVGF temporal/spatial filter with antilag.
//!
//! The [`Denoiser`] records its kernels through a [`DenoiseDevice`]. Two backends ship:
//! [`cpu::CpuDevice`] (host reference, used by the tests) and, with the `wgpu` feature,
//! `gpu::WgpuDevice` (WGSL compute).

pub mod config;
pub mod cpu;
pub mod denoiser;
pub mod device;
pub mod error;
#[cfg(feature = "wgpu")]
pub mod gpu;
pub mod history;
pub mod kernel;
pub mod pool;
pub mod resources;

pub use config::{AntilagConfig, DebugView, DenoiserConfig};
pub use denoiser::{DenoiseInputs, DenoisedFrame, Denoiser};
pub use device::{Bindings, DenoiseDevice, ImageDesc};
pub use error::{DenoiseError, DenoiseResult};
pub use history::{HistoryControl, HistoryDecision, HistoryQuery, InvalidationReason};
pub use kernel::{Kernel, KernelLayout, KernelParams, Requirement, Slot};
pub use pool::{FrameBundle, FrameResourcePool};
pub use resources::{FrameImages, FrameResources};
