//! Host implementations of the denoiser kernels. These define the numeric contract the
//! WGSL kernels follow.

use render_api::{luminance, Extent};

use crate::error::{DenoiseError, DenoiseResult};
use crate::kernel::{flags, visualize, Kernel, KernelParams, Slot};

type Texel = [f32; 4];

/// B3-spline weights for offsets -2..=2.
const B3: [f32; 5] = [1.0 / 16.0, 1.0 / 4.0, 3.0 / 8.0, 1.0 / 4.0, 1.0 / 16.0];
const GAUSS3: [f32; 3] = [0.25, 0.5, 0.25];
/// Reprojection weight below which a pixel counts as disoccluded.
const MIN_HISTORY_WEIGHT: f32 = 1e-3;
const VARIANCE_WINDOW: i32 = 3;

#[derive(Clone, Copy)]
pub(crate) struct View<'a> {
    pub extent: Extent,
    pub texels: &'a [Texel],
}

impl View<'_> {
    fn at(&self, x: u32, y: u32) -> Texel {
        self.texels.get(self.extent.index(x, y)).copied().unwrap_or_default()
    }

    fn fetch(&self, x: i32, y: i32) -> Option<Texel> {
        self.extent.contains(x, y).then(|| self.at(x as u32, y as u32))
    }
}

pub(crate) struct Inputs<'a> {
    kernel: Kernel,
    views: Vec<(Slot, View<'a>)>,
}

impl<'a> Inputs<'a> {
    pub fn new(kernel: Kernel, views: Vec<(Slot, View<'a>)>) -> Self {
        Self { kernel, views }
    }

    fn get(&self, slot: Slot) -> Option<View<'a>> {
        self.views.iter().find(|(s, _)| *s == slot).map(|(_, view)| *view)
    }

    fn require(&self, slot: Slot) -> DenoiseResult<View<'a>> {
        self.get(slot).ok_or(DenoiseError::MissingBinding { kernel: self.kernel, slot })
    }
}

/// Run `kernel`; one output plane per write slot, in layout order.
pub(crate) fn run(kernel: Kernel, inputs: &Inputs<'_>, params: &KernelParams) -> DenoiseResult<Vec<Vec<Texel>>> {
    let outputs = match kernel {
        Kernel::Clear => vec![vec![[0.0; 4]; params.extent().texel_count()]],
        Kernel::Gradient => vec![gradient(inputs, params)?],
        Kernel::GradientAtrous => vec![gradient_atrous(inputs, params)?],
        Kernel::Temporal => {
            let (color, moments) = temporal(inputs, params)?;
            vec![color, moments]
        }
        Kernel::Variance => vec![variance(inputs, params)?],
        Kernel::Atrous => vec![atrous(inputs, params)?],
        Kernel::HistoryTap => vec![history_tap(inputs, params)?],
        Kernel::Visualize => vec![visualize(inputs, params)?],
    };
    Ok(outputs)
}

fn per_pixel(extent: Extent, mut f: impl FnMut(u32, u32) -> Texel) -> Vec<Texel> {
    let mut out = Vec::with_capacity(extent.texel_count());
    for y in 0..extent.height {
        for x in 0..extent.width {
            out.push(f(x, y));
        }
    }
    out
}

fn lum(t: Texel) -> f32 {
    luminance([t[0], t[1], t[2]])
}

fn same_surface(a: Texel, b: Texel) -> bool {
    a[0].to_bits() == b[0].to_bits() && a[1].to_bits() == b[1].to_bits()
}

fn same_instance(a: Texel, b: Texel) -> bool {
    a[0].to_bits() == b[0].to_bits()
}

/// Antilag factor in [0, 1] of one gradient texel.
pub(crate) fn antilag_factor(gradient: Texel, scale: f32) -> f32 {
    if gradient[3] <= 0.0 {
        return 0.0;
    }
    (gradient[0].abs() / gradient[1].max(1e-4) * scale).clamp(0.0, 1.0)
}

/// Tap spacing of a dilated filter. Beyond the longer image side only the centre tap
/// lands inside, so larger strides are equivalent.
fn tap_stride(step: u32, extent: Extent) -> i32 {
    step.clamp(1, extent.width.max(extent.height).max(1)) as i32
}

fn blend(prev: f32, cur: f32, n: f32) -> f32 {
    if n <= 1.0 {
        cur
    } else {
        prev + (cur - prev) / n
    }
}

struct History {
    color: Texel,
    moments: Texel,
}

fn reproject(uv: [f32; 2], vis: Texel, prev_color: View, prev_moments: View, prev_vis: View) -> Option<History> {
    if !(0.0..=1.0).contains(&uv[0]) || !(0.0..=1.0).contains(&uv[1]) {
        return None;
    }
    let source = prev_vis.extent;
    let px = uv[0] * source.width as f32 - 0.5;
    let py = uv[1] * source.height as f32 - 0.5;
    let (x0, y0) = (px.floor(), py.floor());
    let (fx, fy) = (px - x0, py - y0);
    let taps = [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ];
    let mut color = [0.0f32; 4];
    let mut moments = [0.0f32; 4];
    let mut total = 0.0f32;
    for (dx, dy, w) in taps {
        if w <= 0.0 {
            continue;
        }
        let (tx, ty) = (x0 as i32 + dx, y0 as i32 + dy);
        let Some(pv) = prev_vis.fetch(tx, ty) else { continue };
        if !same_surface(vis, pv) {
            continue;
        }
        let (c, m) = (prev_color.at(tx as u32, ty as u32), prev_moments.at(tx as u32, ty as u32));
        for i in 0..4 {
            color[i] += w * c[i];
            moments[i] += w * m[i];
        }
        total += w;
    }
    if total < MIN_HISTORY_WEIGHT {
        return None;
    }
    Some(History { color: color.map(|v| v / total), moments: moments.map(|v| v / total) })
}

fn temporal(inputs: &Inputs<'_>, p: &KernelParams) -> DenoiseResult<(Vec<Texel>, Vec<Texel>)> {
    let radiance = inputs.require(Slot::Radiance)?;
    let visibility = inputs.require(Slot::Visibility)?;
    let prev_color = inputs.require(Slot::PrevAccumColor)?;
    let prev_moments = inputs.require(Slot::PrevAccumMoments)?;
    let prev_vis = inputs.require(Slot::PrevVisibility)?;
    let motion = if p.has_flag(flags::USE_MOTION) { inputs.get(Slot::Motion) } else { None };
    let gradient = if p.has_flag(flags::USE_GRADIENT) { inputs.get(Slot::Gradient) } else { None };
    let extent = p.extent();
    let downsample = p.downsample.max(1);

    let mut moments_out = Vec::with_capacity(extent.texel_count());
    let color_out = per_pixel(extent, |x, y| {
        let cur = radiance.at(x, y);
        let vis = visibility.at(x, y);
        let uv = match motion {
            Some(m) => {
                let t = m.at(x, y);
                [t[0], t[1]]
            }
            None => [(x as f32 + 0.5) / extent.width as f32, (y as f32 + 0.5) / extent.height as f32],
        };
        let limit = match gradient {
            Some(g) => {
                let a = antilag_factor(g.at(x / downsample, y / downsample), p.antilag_scale);
                (p.history_limit * (1.0 - a)).max(1.0)
            }
            None => p.history_limit.max(1.0),
        };
        let l = lum(cur);
        let (prev_len, prev_c, prev_m) = match reproject(uv, vis, prev_color, prev_moments, prev_vis) {
            Some(h) => (h.moments[2], h.color, [h.moments[0], h.moments[1]]),
            None => (0.0, cur, [l, l * l]),
        };
        let n = (prev_len + 1.0).min(limit);
        moments_out.push([blend(prev_m[0], l, n), blend(prev_m[1], l * l, n), n, 0.0]);
        [blend(prev_c[0], cur[0], n), blend(prev_c[1], cur[1], n), blend(prev_c[2], cur[2], n), n]
    });
    Ok((color_out, moments_out))
}

fn variance(inputs: &Inputs<'_>, p: &KernelParams) -> DenoiseResult<Vec<Texel>> {
    let color = inputs.require(Slot::AccumColor)?;
    let moments = inputs.require(Slot::AccumMoments)?;
    let visibility = inputs.require(Slot::Visibility)?;
    Ok(per_pixel(p.extent(), |x, y| {
        let c = color.at(x, y);
        let m = moments.at(x, y);
        let (m1, m2) = if m[2] < p.spatial_variance_frames {
            let centre = visibility.at(x, y);
            let (mut s1, mut s2, mut count) = (0.0f32, 0.0f32, 0.0f32);
            for dy in -VARIANCE_WINDOW..=VARIANCE_WINDOW {
                for dx in -VARIANCE_WINDOW..=VARIANCE_WINDOW {
                    let (tx, ty) = (x as i32 + dx, y as i32 + dy);
                    let Some(v) = visibility.fetch(tx, ty) else { continue };
                    if !same_instance(centre, v) {
                        continue;
                    }
                    let tm = moments.at(tx as u32, ty as u32);
                    s1 += tm[0];
                    s2 += tm[1];
                    count += 1.0;
                }
            }
            (s1 / count, s2 / count)
        } else {
            (m[0], m[1])
        };
        [c[0], c[1], c[2], (m2 - m1 * m1).max(0.0)]
    }))
}

fn prefiltered_variance(input: View, x: u32, y: u32) -> f32 {
    let (mut sum, mut total) = (0.0f32, 0.0f32);
    for dy in -1..=1i32 {
        for dx in -1..=1i32 {
            let Some(t) = input.fetch(x as i32 + dx, y as i32 + dy) else { continue };
            let w = GAUSS3[(dx + 1) as usize] * GAUSS3[(dy + 1) as usize];
            sum += w * t[3];
            total += w;
        }
    }
    sum / total
}

fn atrous(inputs: &Inputs<'_>, p: &KernelParams) -> DenoiseResult<Vec<Texel>> {
    let input = inputs.require(Slot::Input)?;
    let visibility = inputs.require(Slot::Visibility)?;
    let albedo = inputs.require(Slot::Albedo)?;
    let step = tap_stride(p.step, p.extent());
    Ok(per_pixel(p.extent(), |x, y| {
        let c = input.at(x, y);
        let cv = visibility.at(x, y);
        let ca = albedo.at(x, y);
        let cl = lum(c);
        let lum_scale = p.phi_luminance * prefiltered_variance(input, x, y).sqrt() + 1e-6;
        let depth_scale = cv[2].max(1e-3);

        let mut acc = [0.0f32; 3];
        let (mut total, mut var) = (0.0f32, 0.0f32);
        for (j, dy) in (-2..=2i32).enumerate() {
            for (i, dx) in (-2..=2i32).enumerate() {
                let (tx, ty) = (x as i32 + dx * step, y as i32 + dy * step);
                let Some(tv) = visibility.fetch(tx, ty) else { continue };
                if !same_instance(cv, tv) {
                    continue;
                }
                let t = input.at(tx as u32, ty as u32);
                let ta = albedo.at(tx as u32, ty as u32);
                let albedo_delta = (ca[0] - ta[0]).abs() + (ca[1] - ta[1]).abs() + (ca[2] - ta[2]).abs();
                let w = B3[i]
                    * B3[j]
                    * (-(cl - lum(t)).abs() / lum_scale).exp()
                    * (-p.phi_albedo * albedo_delta).exp()
                    * (-p.phi_depth * (cv[2] - tv[2]).abs() / depth_scale).exp();
                for k in 0..3 {
                    acc[k] += w * (t[k] - c[k]);
                }
                total += w;
                var += w * w * t[3];
            }
        }
        // The centre tap always survives, so total > 0.
        [c[0] + acc[0] / total, c[1] + acc[1] / total, c[2] + acc[2] / total, var / (total * total)]
    }))
}

fn history_tap(inputs: &Inputs<'_>, p: &KernelParams) -> DenoiseResult<Vec<Texel>> {
    let input = inputs.require(Slot::Input)?;
    let moments = inputs.require(Slot::AccumMoments)?;
    Ok(per_pixel(p.extent(), |x, y| {
        let c = input.at(x, y);
        [c[0], c[1], c[2], moments.at(x, y)[2]]
    }))
}

fn gradient(inputs: &Inputs<'_>, p: &KernelParams) -> DenoiseResult<Vec<Texel>> {
    let samples = inputs.require(Slot::GradientSamples)?;
    let prev_radiance = inputs.require(Slot::PrevRadiance)?;
    let source = prev_radiance.extent;
    Ok(per_pixel(p.extent(), |x, y| {
        let s = samples.at(x, y);
        if s[3] <= 0.0 || source.is_empty() {
            return [0.0; 4];
        }
        let px = (s[1].max(0.0) as u32).min(source.width - 1);
        let py = (s[2].max(0.0) as u32).min(source.height - 1);
        let stored = lum(prev_radiance.at(px, py));
        [s[0] - stored, s[0].max(stored), 0.0, 1.0]
    }))
}

fn gradient_atrous(inputs: &Inputs<'_>, p: &KernelParams) -> DenoiseResult<Vec<Texel>> {
    let input = inputs.require(Slot::Input)?;
    let step = tap_stride(p.step, p.extent());
    Ok(per_pixel(p.extent(), |x, y| {
        let (mut delta, mut peak, mut count) = (0.0f32, 0.0f32, 0.0f32);
        for dy in -1..=1i32 {
            for dx in -1..=1i32 {
                let Some(t) = input.fetch(x as i32 + dx * step, y as i32 + dy * step) else { continue };
                if t[3] <= 0.0 {
                    continue;
                }
                delta += t[0];
                peak += t[1];
                count += 1.0;
            }
        }
        if count == 0.0 {
            [0.0; 4]
        } else {
            [delta / count, peak / count, 0.0, 1.0]
        }
    }))
}

fn visualize(inputs: &Inputs<'_>, p: &KernelParams) -> DenoiseResult<Vec<Texel>> {
    let input = inputs.require(Slot::Input)?;
    let downsample = p.downsample.max(1);
    Ok(per_pixel(p.extent(), |x, y| {
        let v = match p.debug_mode {
            visualize::GRADIENT => antilag_factor(input.at(x / downsample, y / downsample), p.antilag_scale),
            _ => input.at(x, y)[3] * p.visualize_scale,
        };
        [v, v, v, 1.0]
    }))
}
