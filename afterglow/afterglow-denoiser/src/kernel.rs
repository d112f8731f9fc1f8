//! Kernel identities and their binding tables.
//!
//! Bindings are keyed by [`Slot`], never by name. Binding index = position in
//! `reads`, then `writes`, then the [`KernelParams`] uniform. The WGSL sources
//! in `shaders/` declare their bindings in exactly this order.

use render_api::Extent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    Clear,
    Gradient,
    GradientAtrous,
    Temporal,
    Variance,
    Atrous,
    HistoryTap,
    Visualize,
}

/// Stable binding identifiers shared by every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Radiance,
    Albedo,
    Visibility,
    Motion,
    PrevRadiance,
    PrevVisibility,
    PrevAccumColor,
    PrevAccumMoments,
    GradientSamples,
    Gradient,
    AccumColor,
    AccumMoments,
    Input,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    Required,
    /// May be left unbound; the kernel checks the matching `KernelParams` flag.
    Optional,
}

#[derive(Clone, Copy, Debug)]
pub struct KernelLayout {
    pub reads: &'static [(Slot, Requirement)],
    pub writes: &'static [Slot],
}

impl KernelLayout {
    pub fn binding_count(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    /// Binding index of the parameter uniform.
    pub fn params_binding(&self) -> u32 {
        self.binding_count() as u32
    }
}

use Requirement::{Optional, Required};

impl Kernel {
    pub const ALL: [Kernel; 8] = [
        Kernel::Clear,
        Kernel::Gradient,
        Kernel::GradientAtrous,
        Kernel::Temporal,
        Kernel::Variance,
        Kernel::Atrous,
        Kernel::HistoryTap,
        Kernel::Visualize,
    ];

    pub const fn layout(self) -> KernelLayout {
        match self {
            Kernel::Clear => KernelLayout { reads: &[], writes: &[Slot::Output] },
            Kernel::Gradient => KernelLayout {
                reads: &[(Slot::GradientSamples, Required), (Slot::PrevRadiance, Required)],
                writes: &[Slot::Output],
            },
            Kernel::GradientAtrous => KernelLayout { reads: &[(Slot::Input, Required)], writes: &[Slot::Output] },
            Kernel::Temporal => KernelLayout {
                reads: &[
                    (Slot::Radiance, Required),
                    (Slot::Visibility, Required),
                    (Slot::Motion, Optional),
                    (Slot::PrevAccumColor, Required),
                    (Slot::PrevAccumMoments, Required),
                    (Slot::PrevVisibility, Required),
                    (Slot::Gradient, Optional),
                ],
                writes: &[Slot::AccumColor, Slot::AccumMoments],
            },
            Kernel::Variance => KernelLayout {
                reads: &[(Slot::AccumColor, Required), (Slot::AccumMoments, Required), (Slot::Visibility, Required)],
                writes: &[Slot::Output],
            },
            Kernel::Atrous => KernelLayout {
                reads: &[(Slot::Input, Required), (Slot::Visibility, Required), (Slot::Albedo, Required)],
                writes: &[Slot::Output],
            },
            Kernel::HistoryTap => KernelLayout {
                reads: &[(Slot::Input, Required), (Slot::AccumMoments, Required)],
                writes: &[Slot::AccumColor],
            },
            Kernel::Visualize => KernelLayout { reads: &[(Slot::Input, Required)], writes: &[Slot::Output] },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Kernel::Clear => "afterglow.clear",
            Kernel::Gradient => "afterglow.gradient",
            Kernel::GradientAtrous => "afterglow.gradient_atrous",
            Kernel::Temporal => "afterglow.temporal",
            Kernel::Variance => "afterglow.variance",
            Kernel::Atrous => "afterglow.atrous",
            Kernel::HistoryTap => "afterglow.history_tap",
            Kernel::Visualize => "afterglow.visualize",
        }
    }
}

/// `KernelParams::flags` bits.
pub mod flags {
    pub const USE_MOTION: u32 = 1 << 0;
    pub const USE_GRADIENT: u32 = 1 << 1;
}

/// `KernelParams::debug_mode` values for [`Kernel::Visualize`].
pub mod visualize {
    /// Output `input.a * visualize_scale` as grey.
    pub const ALPHA: u32 = 0;
    /// Output the antilag factor of a low-resolution gradient buffer, upsampled.
    pub const GRADIENT: u32 = 1;
}

/// Per-dispatch uniform. Layout matches `struct Params` in `shaders/common.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KernelParams {
    /// Extent of the image(s) written by the dispatch.
    pub extent: [u32; 2],
    /// Extent of the previous frame / low-resolution buffer being sampled.
    pub source_extent: [u32; 2],
    /// À-trous stride in pixels.
    pub step: u32,
    pub flags: u32,
    pub history_limit: f32,
    pub antilag_scale: f32,
    pub phi_luminance: f32,
    pub phi_albedo: f32,
    pub phi_depth: f32,
    pub downsample: u32,
    pub debug_mode: u32,
    pub spatial_variance_frames: f32,
    pub visualize_scale: f32,
    pub _pad: u32,
}

impl KernelParams {
    pub fn for_extent(extent: Extent) -> Self {
        Self {
            extent: [extent.width, extent.height],
            source_extent: [extent.width, extent.height],
            step: 1,
            flags: 0,
            history_limit: 1.0,
            antilag_scale: 0.0,
            phi_luminance: 0.0,
            phi_albedo: 0.0,
            phi_depth: 0.0,
            downsample: 1,
            debug_mode: 0,
            spatial_variance_frames: 0.0,
            visualize_scale: 1.0,
            _pad: 0,
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.extent[0], self.extent[1])
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// Compute workgroup edge used by every kernel.
pub const WORKGROUP_SIZE: u32 = 8;

pub fn workgroup_count(extent: Extent) -> (u32, u32) {
    (extent.width.div_ceil(WORKGROUP_SIZE), extent.height.div_ceil(WORKGROUP_SIZE))
}
