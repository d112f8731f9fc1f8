//! Data types integrators fill each frame and hand to the denoiser.
//! Matrices are column-major 4x4 (WGSL/wgpu convention), index [col*4+row].

/// Image extent in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Extent of a buffer sampled once per `factor`×`factor` block (rounded up).
    pub fn downsampled(&self, factor: u32) -> Extent {
        let factor = factor.max(1);
        Extent::new(self.width.div_ceil(factor), self.height.div_ceil(factor))
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Camera/projection record for one view of the frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewRecord {
    pub view: [f32; 16],
    pub projection: [f32; 16],
    /// Viewport origin and size inside the frame, in pixels.
    pub viewport: [u32; 4],
}

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
];

impl ViewRecord {
    pub fn new(view: [f32; 16], projection: [f32; 16], extent: Extent) -> Self {
        Self { view, projection, viewport: [0, 0, extent.width, extent.height] }
    }

    /// Identity camera covering the whole `extent`.
    pub fn identity(extent: Extent) -> Self {
        Self::new(IDENTITY, IDENTITY, extent)
    }

    /// Bit-exact comparison of the camera transform; any change counts.
    pub fn same_transform(&self, other: &ViewRecord) -> bool {
        let bits = |m: &[f32; 16]| m.map(f32::to_bits);
        bits(&self.view) == bits(&other.view)
            && bits(&self.projection) == bits(&other.projection)
            && self.viewport == other.viewport
    }
}

impl Default for ViewRecord {
    fn default() -> Self {
        Self { view: IDENTITY, projection: IDENTITY, viewport: [0, 0, 800, 600] }
    }
}

/// Per-pixel surface identity: scene instance + primitive, plus linear depth.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct VisibilityRecord {
    pub instance_id: u32,
    pub primitive_id: u32,
    pub depth: f32,
}

impl VisibilityRecord {
    /// Primary ray missed all geometry.
    pub const MISS: VisibilityRecord = VisibilityRecord {
        instance_id: u32::MAX,
        primitive_id: u32::MAX,
        depth: 0.0,
    };

    pub fn new(instance_id: u32, primitive_id: u32, depth: f32) -> Self {
        Self { instance_id, primitive_id, depth }
    }

    pub fn is_miss(&self) -> bool {
        self.instance_id == u32::MAX
    }

    /// Texel encoding shared with the kernels: ids are bit-cast into the float channels.
    pub fn to_texel(&self) -> [f32; 4] {
        [f32::from_bits(self.instance_id), f32::from_bits(self.primitive_id), self.depth, 0.0]
    }

    pub fn from_texel(texel: [f32; 4]) -> Self {
        Self { instance_id: texel[0].to_bits(), primitive_id: texel[1].to_bits(), depth: texel[2] }
    }
}

/// One antilag stratum: last frame's sample re-shaded under the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct GradientSample {
    /// Luminance of the re-evaluated sample.
    pub reshaded_luminance: f32,
    /// Pixel the sample was taken at in the previous frame.
    pub previous_pixel: [u32; 2],
}

impl GradientSample {
    pub fn to_texel(sample: Option<&GradientSample>) -> [f32; 4] {
        match sample {
            Some(s) => [s.reshaded_luminance, s.previous_pixel[0] as f32, s.previous_pixel[1] as f32, 1.0],
            None => [0.0; 4],
        }
    }
}

/// Host-side output of an integrator for one frame.
#[derive(Clone, Debug, Default)]
pub struct IntegratorFrame {
    pub extent: Extent,
    pub radiance: Vec<[f32; 4]>,
    pub albedo: Vec<[f32; 4]>,
    pub visibility: Vec<VisibilityRecord>,
    /// Previous-frame screen UV per pixel. None when the integrator has no reprojection support.
    pub motion: Option<Vec<[f32; 2]>>,
    /// One entry per `downsample`×`downsample` stratum, row-major over the downsampled extent.
    pub gradient_samples: Option<Vec<Option<GradientSample>>>,
}

impl IntegratorFrame {
    pub fn visibility_texels(&self) -> Vec<[f32; 4]> {
        self.visibility.iter().map(VisibilityRecord::to_texel).collect()
    }

    pub fn motion_texels(&self) -> Option<Vec<[f32; 4]>> {
        self.motion.as_ref().map(|m| m.iter().map(|uv| [uv[0], uv[1], 0.0, 0.0]).collect())
    }

    pub fn gradient_texels(&self) -> Option<Vec<[f32; 4]>> {
        self.gradient_samples
            .as_ref()
            .map(|g| g.iter().map(|s| GradientSample::to_texel(s.as_ref())).collect())
    }
}

/// Rec. 709 luminance.
pub fn luminance(rgb: [f32; 3]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}
