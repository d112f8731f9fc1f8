//! Procedural toy integrator for the debug binaries: noisy Monte-Carlo shading of a few
//! moving discs over a ground plane, lit by an orbiting area light.

use render_api::{luminance, Extent, FrameProducer, GradientSample, IntegratorFrame, ViewRecord, VisibilityRecord};

#[derive(Clone, Debug)]
struct Disc {
    /// Pixel-space centre at frame 0.
    center: [f32; 2],
    /// Pixels per frame.
    velocity: [f32; 2],
    radius: f32,
    depth: f32,
    albedo: [f32; 3],
}

#[derive(Clone, Copy, Debug)]
struct Surface {
    instance: u32,
    depth: f32,
    albedo: [f32; 3],
    velocity: [f32; 2],
}

#[derive(Clone, Copy, Debug)]
struct Light {
    position: [f32; 2],
    intensity: f32,
}

const GROUND: Surface = Surface { instance: 0, depth: 100.0, albedo: [0.6, 0.6, 0.55], velocity: [0.0, 0.0] };

pub struct ToyScene {
    extent: Extent,
    discs: Vec<Disc>,
    samples_per_pixel: u32,
    light_speed: f32,
    /// Light switches between full and quarter intensity every this many frames.
    flicker_period: Option<u64>,
    gradient_downsample: Option<u32>,
    motion: bool,
}

impl ToyScene {
    pub fn new(extent: Extent) -> Self {
        let (w, h) = (extent.width as f32, extent.height as f32);
        let s = w.min(h);
        let discs = vec![
            Disc { center: [0.3 * w, 0.4 * h], velocity: [0.5, 0.0], radius: 0.15 * s, depth: 5.0, albedo: [0.8, 0.2, 0.2] },
            Disc { center: [0.65 * w, 0.55 * h], velocity: [0.0, -0.35], radius: 0.2 * s, depth: 7.0, albedo: [0.2, 0.7, 0.3] },
            Disc { center: [0.5 * w, 0.8 * h], velocity: [0.0, 0.0], radius: 0.1 * s, depth: 3.0, albedo: [0.3, 0.3, 0.9] },
        ];
        Self {
            extent,
            discs,
            samples_per_pixel: 1,
            light_speed: 0.05,
            flicker_period: None,
            gradient_downsample: Some(3),
            motion: true,
        }
    }

    pub fn with_samples_per_pixel(mut self, spp: u32) -> Self {
        self.samples_per_pixel = spp.max(1);
        self
    }

    pub fn with_light_speed(mut self, speed: f32) -> Self {
        self.light_speed = speed;
        self
    }

    pub fn with_flicker(mut self, period: u64) -> Self {
        self.flicker_period = (period > 0).then_some(period);
        self
    }

    /// Emit antilag samples at `downsample`, or none.
    pub fn with_gradients(mut self, downsample: Option<u32>) -> Self {
        self.gradient_downsample = downsample.map(|d| d.max(1));
        self
    }

    pub fn with_motion(mut self, motion: bool) -> Self {
        self.motion = motion;
        self
    }

    fn light(&self, frame: u64) -> Light {
        let (w, h) = (self.extent.width as f32, self.extent.height as f32);
        let angle = frame as f32 * self.light_speed;
        let intensity = match self.flicker_period {
            Some(period) if (frame / period) % 2 == 1 => 0.25,
            _ => 1.0,
        };
        Light { position: [0.5 * w + 0.35 * w * angle.cos(), 0.5 * h + 0.35 * h * angle.sin()], intensity }
    }

    fn surface(&self, p: [f32; 2], frame: u64) -> Surface {
        let t = frame as f32;
        let mut best = GROUND;
        for (i, disc) in self.discs.iter().enumerate() {
            let c = [disc.center[0] + disc.velocity[0] * t, disc.center[1] + disc.velocity[1] * t];
            let (dx, dy) = (p[0] - c[0], p[1] - c[1]);
            if dx * dx + dy * dy < disc.radius * disc.radius && disc.depth < best.depth {
                best = Surface { instance: i as u32 + 1, depth: disc.depth, albedo: disc.albedo, velocity: disc.velocity };
            }
        }
        best
    }

    /// One-bounce estimate with a jittered area-light sample and stochastic occlusion.
    fn shade(&self, p: [f32; 2], albedo: [f32; 3], light: Light, seed: [u32; 3]) -> [f32; 3] {
        let height = 0.25 * self.extent.width.max(self.extent.height) as f32;
        let light_size = 0.1 * height;
        let mut sum = 0.0f32;
        for s in 0..self.samples_per_pixel {
            let lx = light.position[0] + (hash01(seed, s, 0) - 0.5) * light_size;
            let ly = light.position[1] + (hash01(seed, s, 1) - 0.5) * light_size;
            let (dx, dy) = (p[0] - lx, p[1] - ly);
            let irradiance = light.intensity * height * height / (dx * dx + dy * dy + height * height);
            let visible = if hash01(seed, s, 2) < 0.5 { 2.0 } else { 0.0 };
            sum += irradiance * visible;
        }
        let e = sum / self.samples_per_pixel as f32;
        [albedo[0] * e, albedo[1] * e, albedo[2] * e]
    }

    fn pixel_center(x: u32, y: u32) -> [f32; 2] {
        [x as f32 + 0.5, y as f32 + 0.5]
    }

    fn seed(x: u32, y: u32, frame: u64) -> [u32; 3] {
        [x, y, frame as u32]
    }

    /// Last frame's sample in each stratum, re-shaded under this frame's light and geometry.
    fn gradient_samples(&self, frame: u64, downsample: u32) -> Vec<Option<GradientSample>> {
        let strata = self.extent.downsampled(downsample);
        let mut out = Vec::with_capacity(strata.texel_count());
        for sy in 0..strata.height {
            for sx in 0..strata.width {
                out.push(frame.checked_sub(1).and_then(|prev| self.gradient_sample(sx, sy, prev, frame, downsample)));
            }
        }
        out
    }

    fn gradient_sample(&self, sx: u32, sy: u32, prev: u64, frame: u64, downsample: u32) -> Option<GradientSample> {
        let pick = Self::seed(sx, sy, prev);
        let px = (sx * downsample + (hash01(pick, 0, 7) * downsample as f32) as u32).min(self.extent.width - 1);
        let py = (sy * downsample + (hash01(pick, 0, 8) * downsample as f32) as u32).min(self.extent.height - 1);
        let p = Self::pixel_center(px, py);
        let surface = self.surface(p, prev);
        let moved = [p[0] + surface.velocity[0], p[1] + surface.velocity[1]];
        if self.surface(moved, frame).instance != surface.instance {
            return None;
        }
        let reshaded = self.shade(moved, surface.albedo, self.light(frame), Self::seed(px, py, prev));
        Some(GradientSample { reshaded_luminance: luminance(reshaded), previous_pixel: [px, py] })
    }

    pub fn render(&self, frame: u64) -> IntegratorFrame {
        let extent = self.extent;
        let n = extent.texel_count();
        let light = self.light(frame);
        let mut out = IntegratorFrame {
            extent,
            radiance: Vec::with_capacity(n),
            albedo: Vec::with_capacity(n),
            visibility: Vec::with_capacity(n),
            motion: self.motion.then(|| Vec::with_capacity(n)),
            gradient_samples: None,
        };
        let (w, h) = (extent.width as f32, extent.height as f32);
        for y in 0..extent.height {
            for x in 0..extent.width {
                let p = Self::pixel_center(x, y);
                let surface = self.surface(p, frame);
                let c = self.shade(p, surface.albedo, light, Self::seed(x, y, frame));
                out.radiance.push([c[0], c[1], c[2], 1.0]);
                out.albedo.push([surface.albedo[0], surface.albedo[1], surface.albedo[2], 1.0]);
                out.visibility.push(VisibilityRecord::new(surface.instance, 0, surface.depth));
                if let Some(motion) = out.motion.as_mut() {
                    motion.push([(p[0] - surface.velocity[0]) / w, (p[1] - surface.velocity[1]) / h]);
                }
            }
        }
        out.gradient_samples = self.gradient_downsample.map(|d| self.gradient_samples(frame, d));
        out
    }
}

impl FrameProducer for ToyScene {
    type Error = std::convert::Infallible;

    fn produce(&mut self, _views: &[ViewRecord], frame_index: u64) -> Result<IntegratorFrame, Self::Error> {
        Ok(self.render(frame_index))
    }
}

fn hash01(seed: [u32; 3], sample: u32, dim: u32) -> f32 {
    let mut h = seed[0].wrapping_mul(0x8da6_b343)
        ^ seed[1].wrapping_mul(0xd816_3841)
        ^ seed[2].wrapping_mul(0xcb1a_b31f)
        ^ sample.wrapping_mul(0x1656_67b1)
        ^ dim.wrapping_mul(0x27d4_eb2d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2c1b_3c6d);
    h ^= h >> 12;
    h = h.wrapping_mul(0x297a_2d39);
    h ^= h >> 15;
    (h >> 8) as f32 / 16_777_216.0
}

/// Reinhard tone map + sRGB-ish gamma into an 8-bit image.
pub fn to_rgb8(extent: Extent, texels: &[[f32; 4]]) -> image::RgbImage {
    let encode = |v: f32| {
        let v = v.max(0.0);
        ((v / (1.0 + v)).powf(1.0 / 2.2) * 255.0 + 0.5) as u8
    };
    image::RgbImage::from_fn(extent.width, extent.height, |x, y| {
        let t = texels.get(extent.index(x, y)).copied().unwrap_or_default();
        image::Rgb([encode(t[0]), encode(t[1]), encode(t[2])])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_light_and_geometry_give_zero_gradient() {
        let mut scene = ToyScene::new(Extent::new(24, 24)).with_light_speed(0.0).with_gradients(Some(3));
        for disc in &mut scene.discs {
            disc.velocity = [0.0, 0.0];
        }
        let prev = scene.render(4);
        let cur = scene.render(5);
        let samples = cur.gradient_samples.unwrap();
        assert_eq!(samples.len(), 64);
        for sample in samples.into_iter().flatten() {
            let [x, y] = sample.previous_pixel;
            let stored = prev.radiance[prev.extent.index(x, y)];
            assert_eq!(sample.reshaded_luminance, luminance([stored[0], stored[1], stored[2]]));
        }
    }

    #[test]
    fn first_frame_has_no_gradient_samples() {
        let frame = ToyScene::new(Extent::new(9, 9)).render(0);
        assert!(frame.gradient_samples.unwrap().iter().all(Option::is_none));
    }

    #[test]
    fn ground_motion_is_identity() {
        let scene = ToyScene::new(Extent::new(16, 16));
        let frame = scene.render(1);
        let motion = frame.motion.unwrap();
        assert_eq!(frame.visibility[0].instance_id, 0);
        assert_eq!(motion[0], [0.5 / 16.0, 0.5 / 16.0]);
    }

    #[test]
    fn flicker_changes_intensity() {
        let scene = ToyScene::new(Extent::new(8, 8)).with_flicker(2);
        assert_eq!(scene.light(1).intensity, 1.0);
        assert_eq!(scene.light(2).intensity, 0.25);
    }
}
