//! End-to-end behaviour of the denoiser on the CPU backend.

use std::sync::Arc;

use afterglow_denoiser::cpu::{CpuDevice, CpuImage};
use afterglow_denoiser::{
    DebugView, DenoiseDevice, DenoiseError, DenoiseInputs, Denoiser, DenoiserConfig, ImageDesc, InvalidationReason,
};
use render_api::{luminance, Extent, GpuFence, GradientSample, HostFence, IntegratorFrame, ViewRecord, VisibilityRecord};

const EXTENT: Extent = Extent::new(16, 16);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic per-pixel noise in [0, 1).
fn noise(x: u32, y: u32, seed: u32) -> f32 {
    let mut h = x.wrapping_mul(0x8da6_b343) ^ y.wrapping_mul(0xd816_3841) ^ seed.wrapping_mul(0xcb1a_b31f);
    h ^= h >> 13;
    h = h.wrapping_mul(0x5bd1_e995);
    h ^= h >> 15;
    (h & 0x00ff_ffff) as f32 / 16_777_216.0
}

fn scene(extent: Extent, shade: impl Fn(u32, u32) -> f32, instance: impl Fn(u32, u32) -> u32) -> IntegratorFrame {
    let mut frame = IntegratorFrame { extent, ..Default::default() };
    for y in 0..extent.height {
        for x in 0..extent.width {
            let v = shade(x, y);
            frame.radiance.push([v, v * 0.5, v * 0.25, 0.0]);
            frame.albedo.push([0.8, 0.8, 0.8, 0.0]);
            frame.visibility.push(VisibilityRecord::new(instance(x, y), 0, 2.0));
        }
    }
    frame
}

fn flat(extent: Extent, value: f32) -> IntegratorFrame {
    scene(extent, |_, _| value, |_, _| 1)
}

fn noisy(extent: Extent, seed: u32) -> IntegratorFrame {
    scene(extent, |x, y| noise(x, y, seed), |_, _| 1)
}

struct Uploaded {
    radiance: CpuImage,
    albedo: CpuImage,
    visibility: CpuImage,
    motion: Option<CpuImage>,
    gradient: Option<CpuImage>,
}

fn upload(device: &CpuDevice, frame: &IntegratorFrame, downsample: u32) -> Uploaded {
    let image = |label, extent, texels: &[[f32; 4]]| {
        let image = device.create_image(&ImageDesc::new(label, extent)).unwrap();
        device.write_image(&image, texels).unwrap();
        image
    };
    Uploaded {
        radiance: image("radiance", frame.extent, &frame.radiance),
        albedo: image("albedo", frame.extent, &frame.albedo),
        visibility: image("visibility", frame.extent, &frame.visibility_texels()),
        motion: frame.motion_texels().map(|t| image("motion", frame.extent, &t)),
        gradient: frame.gradient_texels().map(|t| image("gradient", frame.extent.downsampled(downsample), &t)),
    }
}

struct Output {
    image: CpuImage,
    texels: Vec<[f32; 4]>,
    accum_color: Vec<[f32; 4]>,
    accum_moments: Vec<[f32; 4]>,
    frame_number: u64,
    history_valid: bool,
    accumulated_frames: u32,
    invalidation: Option<InvalidationReason>,
    fence: HostFence,
}

struct Harness {
    device: Arc<CpuDevice>,
    denoiser: Denoiser<CpuDevice>,
}

impl Harness {
    fn new(config: DenoiserConfig) -> Self {
        Self::with_device(CpuDevice::new(), config)
    }

    fn with_device(device: CpuDevice, config: DenoiserConfig) -> Self {
        init_logging();
        let device = Arc::new(device);
        Self { denoiser: Denoiser::with_config(Arc::clone(&device), config), device }
    }

    fn try_frame(&mut self, frame: &IntegratorFrame, views: &[ViewRecord]) -> Result<Output, DenoiseError> {
        let up = upload(&self.device, frame, self.denoiser.config().antilag.downsample.max(1));
        let mut inputs = DenoiseInputs::new(&up.radiance, &up.albedo, &up.visibility, views);
        if let Some(motion) = &up.motion {
            inputs = inputs.with_motion(motion);
        }
        if let Some(samples) = &up.gradient {
            inputs = inputs.with_gradient_samples(samples);
        }
        let fence = HostFence::new();
        let mut encoder = self.device.create_encoder("test.frame");
        let result = self.denoiser.denoise(&mut encoder, fence.clone(), inputs)?;
        let (image, frame_number, history_valid, accumulated_frames, invalidation) = (
            result.image.clone(),
            result.frame_number,
            result.history_valid,
            result.accumulated_frames,
            result.invalidation,
        );
        self.device.submit(encoder, &fence)?;
        let images = self.denoiser.current_resources().and_then(|r| r.images()).expect("current bundle");
        Ok(Output {
            texels: self.device.read_image(&image)?,
            accum_color: self.device.read_image(&images.accum_color)?,
            accum_moments: self.device.read_image(&images.accum_moments)?,
            image,
            frame_number,
            history_valid,
            accumulated_frames,
            invalidation,
            fence,
        })
    }

    fn frame(&mut self, frame: &IntegratorFrame) -> Output {
        self.try_frame(frame, &[ViewRecord::default()]).unwrap()
    }
}

fn rgb(texels: &[[f32; 4]]) -> Vec<[f32; 3]> {
    texels.iter().map(|t| [t[0], t[1], t[2]]).collect()
}

/// One sample per stratum, each taken at the stratum's top-left pixel last frame.
fn with_gradient_samples(mut frame: IntegratorFrame, downsample: u32, reshaded: f32) -> IntegratorFrame {
    let strata = frame.extent.downsampled(downsample);
    frame.gradient_samples = Some(
        (0..strata.height)
            .flat_map(|y| {
                (0..strata.width).map(move |x| {
                    Some(GradientSample { reshaded_luminance: reshaded, previous_pixel: [x * downsample, y * downsample] })
                })
            })
            .collect(),
    );
    frame
}

fn max_rgb_difference(a: &[[f32; 4]], b: &[[f32; 4]]) -> f32 {
    a.iter()
        .zip(b)
        .flat_map(|(x, y)| (0..3).map(move |i| (x[i] - y[i]).abs()))
        .fold(0.0, f32::max)
}

#[test]
fn first_frame_passes_radiance_through_and_clears_history() {
    let mut h = Harness::new(DenoiserConfig::default());
    let input = noisy(EXTENT, 1);
    let out = h.frame(&input);
    assert!(!out.history_valid);
    assert_eq!(out.invalidation, Some(InvalidationReason::ColdStart));
    assert_eq!(out.accumulated_frames, 0);
    assert_eq!(out.frame_number, 0);
    assert_eq!(rgb(&out.texels), rgb(&input.radiance));
    assert!(out.accum_color.iter().all(|t| *t == [0.0; 4]));
    assert!(out.accum_moments.iter().all(|t| *t == [0.0; 4]));
}

#[test]
fn static_scene_converges_exactly_and_saturates() {
    let limit = 6;
    let mut h = Harness::new(DenoiserConfig { history_limit: limit, atrous_iterations: 0, ..Default::default() });
    let input = noisy(EXTENT, 7);
    h.frame(&input);
    for frame in 1..=(limit + 4) {
        let out = h.frame(&input);
        assert_eq!(out.accumulated_frames, frame);
        assert_eq!(rgb(&out.accum_color), rgb(&input.radiance));
        let expected_len = frame.min(limit) as f32;
        assert!(out.accum_color.iter().all(|t| t[3] == expected_len));
    }
}

#[test]
fn flat_scene_survives_full_filter_chain() {
    let mut h = Harness::new(DenoiserConfig::default());
    let input = flat(EXTENT, 0.4);
    h.frame(&input);
    for _ in 0..6 {
        let out = h.frame(&input);
        assert!(out.history_valid);
        assert_eq!(rgb(&out.texels), rgb(&input.radiance));
    }
}

#[test]
fn without_spatial_filter_output_is_the_running_average() {
    let mut h = Harness::new(DenoiserConfig { atrous_iterations: 0, history_limit: 4, ..Default::default() });
    h.frame(&noisy(EXTENT, 0));
    let mut expected: Vec<[f32; 3]> = Vec::new();
    for seed in 1..=6u32 {
        let input = noisy(EXTENT, seed);
        let out = h.frame(&input);
        let n = (seed as f32).min(4.0);
        if expected.is_empty() {
            expected = rgb(&input.radiance);
        } else {
            for (e, r) in expected.iter_mut().zip(&input.radiance) {
                for i in 0..3 {
                    e[i] += (r[i] - e[i]) / n;
                }
            }
        }
        assert_eq!(rgb(&out.texels), expected);
        assert!(out.image.same_image(&h.denoiser.current_resources().unwrap().images().unwrap().accum_color));
    }
}

#[test]
fn history_tap_feeds_back_pass_output_with_unfiltered_weight() {
    let config = |iterations| DenoiserConfig { atrous_iterations: iterations, history_tap_iteration: 1, ..Default::default() };
    let mut three = Harness::new(config(3));
    let mut two = Harness::new(config(2));
    let mut none = Harness::new(config(0));
    let frames = [noisy(EXTENT, 11), noisy(EXTENT, 12), noisy(EXTENT, 13)];
    let mut last = None;
    for frame in &frames {
        let a = three.frame(frame);
        let b = two.frame(frame);
        let c = none.frame(frame);
        last = Some((a, b, c));
    }
    let (three, two, raw) = last.unwrap();
    assert!(three.history_valid);
    // Pass 1 output of the three-pass chain is the final output of the two-pass chain.
    assert_eq!(rgb(&three.accum_color), rgb(&two.texels));
    assert!(three.accum_color.iter().zip(&three.accum_moments).all(|(c, m)| c[3] == m[2]));
    assert!(three.accum_color.iter().all(|c| c[3] == 2.0));
    assert!(max_rgb_difference(&three.accum_color, &three.texels) > 1e-5);
    assert!(max_rgb_difference(&three.accum_color, &raw.accum_color) > 1e-5);
}

#[test]
fn extent_change_restarts_accumulation() {
    let mut h = Harness::new(DenoiserConfig::default());
    let small = noisy(EXTENT, 3);
    h.frame(&small);
    assert!(h.frame(&small).history_valid);
    let large = noisy(Extent::new(32, 16), 4);
    let out = h.frame(&large);
    assert!(!out.history_valid);
    assert_eq!(out.invalidation, Some(InvalidationReason::ExtentChanged));
    assert_eq!(out.accumulated_frames, 0);
    assert_eq!(rgb(&out.texels), rgb(&large.radiance));
    assert_eq!(h.denoiser.accumulated_frames(), 0);
    assert_eq!(h.frame(&large).accumulated_frames, 1);
}

#[test]
fn scene_cut_rejects_every_pixel() {
    let mut h = Harness::new(DenoiserConfig { atrous_iterations: 0, ..Default::default() });
    let before = scene(EXTENT, |x, y| noise(x, y, 5), |_, _| 1);
    h.frame(&before);
    h.frame(&before);
    assert!(h.frame(&before).accum_color.iter().all(|t| t[3] == 2.0));

    let after = scene(EXTENT, |x, y| noise(x, y, 6), |_, _| 2);
    let out = h.frame(&after);
    assert!(out.history_valid);
    assert!(out.accum_moments.iter().all(|m| m[2] == 1.0));
    assert_eq!(rgb(&out.texels), rgb(&after.radiance));
    for (m, r) in out.accum_moments.iter().zip(&after.radiance) {
        let l = luminance([r[0], r[1], r[2]]);
        assert_eq!(m[0], l);
        assert_eq!(m[1], l * l);
    }
}

#[test]
fn motion_vectors_follow_moving_surfaces() {
    let mut h = Harness::new(DenoiserConfig { atrous_iterations: 0, ..Default::default() });
    let id = |x: u32, shift: u32| x + 10 - shift;
    let still = scene(EXTENT, |x, _| 0.05 * id(x, 0) as f32, |x, _| id(x, 0));
    h.frame(&still);
    h.frame(&still);

    let mut moved = scene(EXTENT, |x, _| 0.05 * id(x, 1) as f32, |x, _| id(x, 1));
    let (w, hgt) = (EXTENT.width as f32, EXTENT.height as f32);
    moved.motion = Some(
        (0..EXTENT.height)
            .flat_map(|y| (0..EXTENT.width).map(move |x| [(x as f32 - 0.5) / w, (y as f32 + 0.5) / hgt]))
            .collect(),
    );
    let mut panned = ViewRecord::default();
    panned.view[12] = 0.1;
    let out = h.try_frame(&moved, &[panned]).unwrap();
    assert!(out.history_valid);
    for y in 0..EXTENT.height {
        let row = &out.accum_moments[EXTENT.index(0, y)..EXTENT.index(0, y) + EXTENT.width as usize];
        assert_eq!(row[0][2], 1.0, "left column was off-screen last frame");
        assert!(row[1..].iter().all(|m| m[2] == 2.0));
    }
}

#[test]
fn camera_motion_without_motion_vectors_invalidates() {
    let mut h = Harness::new(DenoiserConfig::default());
    let input = noisy(EXTENT, 9);
    h.frame(&input);
    h.frame(&input);
    let mut moved = ViewRecord::default();
    moved.view[13] = 0.5;
    let out = h.try_frame(&input, &[moved]).unwrap();
    assert_eq!(out.invalidation, Some(InvalidationReason::CameraMoved));
    assert_eq!(rgb(&out.texels), rgb(&input.radiance));
}

#[test]
fn integrator_debug_mode_change_invalidates() {
    let mut h = Harness::new(DenoiserConfig::default());
    let input = noisy(EXTENT, 2);
    h.frame(&input);
    h.frame(&input);
    h.denoiser.config_mut().debug_view = DebugView::Variance;
    assert!(h.frame(&input).history_valid);
    h.denoiser.config_mut().debug_view = DebugView::Integrator(3);
    assert_eq!(h.frame(&input).invalidation, Some(InvalidationReason::DebugModeChanged));
}

#[test]
fn antilag_drops_stale_history_under_lighting_change() {
    let downsample = 2;
    let config = |enabled| DenoiserConfig {
        atrous_iterations: 0,
        antilag: afterglow_denoiser::AntilagConfig { enabled, downsample, ..Default::default() },
        ..Default::default()
    };
    let dim = flat(EXTENT, 0.2);
    let lit = with_gradient_samples(flat(EXTENT, 0.8), downsample, luminance([0.8, 0.4, 0.2]));

    let mut with = Harness::new(config(true));
    let mut without = Harness::new(config(false));
    for _ in 0..5 {
        with.frame(&dim);
        without.frame(&dim);
    }
    let fast = with.frame(&lit);
    let slow = without.frame(&lit);
    assert_eq!(rgb(&fast.texels), rgb(&lit.radiance));
    assert!(fast.accum_moments.iter().all(|m| m[2] == 1.0));
    assert!(slow.accum_moments.iter().all(|m| m[2] == 5.0));
    assert!(slow.texels.iter().all(|t| t[0] < 0.8));
}

#[test]
fn variance_view_shows_windowed_estimate_on_young_history() {
    let mut h = Harness::new(DenoiserConfig { debug_view: DebugView::Variance, ..Default::default() });
    let input = noisy(EXTENT, 21);
    h.frame(&input);
    // Second frame: every pixel has one frame of history, so variance comes from the 7x7 window.
    let out = h.frame(&input);
    assert!(out.history_valid);
    let lum: Vec<f32> = input.radiance.iter().map(|r| luminance([r[0], r[1], r[2]])).collect();
    for y in 0..EXTENT.height {
        for x in 0..EXTENT.width {
            let (mut s1, mut s2, mut count) = (0.0f32, 0.0f32, 0.0f32);
            for ty in y.saturating_sub(3)..(y + 4).min(EXTENT.height) {
                for tx in x.saturating_sub(3)..(x + 4).min(EXTENT.width) {
                    let l = lum[EXTENT.index(tx, ty)];
                    s1 += l;
                    s2 += l * l;
                    count += 1.0;
                }
            }
            let expected = (s2 / count - (s1 / count).powi(2)).max(0.0);
            let t = out.texels[EXTENT.index(x, y)];
            assert!((t[0] - expected).abs() < 1e-5, "({x}, {y}): {} vs {expected}", t[0]);
            assert_eq!(t[3], 1.0);
        }
    }
    assert!(out.texels.iter().any(|t| t[0] > 1e-3));
}

#[test]
fn gradient_view_shows_antilag_factor() {
    let downsample = 2;
    let config = DenoiserConfig {
        debug_view: DebugView::Gradient,
        antilag: afterglow_denoiser::AntilagConfig { downsample, ..Default::default() },
        ..Default::default()
    };
    let mut h = Harness::new(config);
    h.frame(&flat(EXTENT, 0.2));
    // Without samples there is nothing to show.
    assert!(h.frame(&flat(EXTENT, 0.2)).texels.iter().all(|t| *t == [0.0; 4]));

    let unchanged = with_gradient_samples(flat(EXTENT, 0.2), downsample, luminance([0.2, 0.1, 0.05]));
    assert!(h.frame(&unchanged).texels.iter().all(|t| *t == [0.0, 0.0, 0.0, 1.0]));

    // Relative change 0.75, scaled by 2 and clamped.
    let lit = with_gradient_samples(flat(EXTENT, 0.8), downsample, luminance([0.8, 0.4, 0.2]));
    assert!(h.frame(&lit).texels.iter().all(|t| *t == [1.0; 4]));
}

#[test]
fn oversized_iteration_counts_still_filter() {
    let config = DenoiserConfig {
        atrous_iterations: 40,
        history_tap_iteration: 35,
        antilag: afterglow_denoiser::AntilagConfig { filter_radius: 40, downsample: 2, ..Default::default() },
        ..Default::default()
    };
    let mut h = Harness::new(config);
    let input = with_gradient_samples(flat(EXTENT, 0.4), 2, luminance([0.4, 0.2, 0.1]));
    h.frame(&input);
    for _ in 0..2 {
        let out = h.frame(&input);
        assert!(out.history_valid);
        assert_eq!(rgb(&out.texels), rgb(&input.radiance));
    }
}

#[test]
fn pool_growth_keeps_history() {
    let mut h = Harness::with_device(CpuDevice::new().with_deferred_fences(), DenoiserConfig::default());
    let input = flat(EXTENT, 0.3);
    h.frame(&input);
    for frame in 1..6u32 {
        // Nothing completes, so every frame allocates a fresh bundle at the same extent.
        let out = h.frame(&input);
        assert_eq!(h.denoiser.pool_len(), frame as usize + 1);
        assert!(out.history_valid);
        assert_eq!(out.invalidation, None);
        assert_eq!(out.accumulated_frames, frame);
        assert_eq!(rgb(&out.texels), rgb(&input.radiance));
    }
    h.device.complete_pending();
}

#[test]
fn pool_recycles_only_completed_bundles() {
    let mut h = Harness::with_device(CpuDevice::new().with_deferred_fences(), DenoiserConfig::default());
    let input = flat(EXTENT, 0.3);
    let mut history: Vec<Output> = Vec::new();
    for step in 0..40u32 {
        let out = h.frame(&input);
        if let Some(prev) = history.last() {
            assert_eq!(out.frame_number, prev.frame_number + 1);
            assert!(!out.image.same_image(&prev.image));
        }
        for earlier in &history {
            if earlier.image.same_image(&out.image) {
                assert!(earlier.fence.is_complete(), "bundle reused while in flight");
            }
        }
        history.push(out);
        // Irregular completion: sometimes the GPU falls behind by several frames.
        if noise(step, 0, 99) < 0.6 {
            h.device.complete_oldest();
        }
        if step % 9 == 8 {
            h.device.complete_pending();
        }
    }
    assert!(h.denoiser.pool_len() >= 2);
    h.denoiser.drain().unwrap();
    assert_eq!(h.denoiser.frames_in_flight(), 0);
}

#[test]
fn steady_state_pool_stays_small() {
    let mut h = Harness::new(DenoiserConfig::default());
    let input = flat(EXTENT, 0.3);
    for _ in 0..10 {
        h.frame(&input);
    }
    assert_eq!(h.denoiser.pool_len(), 2);
    assert_eq!(h.denoiser.current_frame(), Some(9));
    assert_eq!(h.denoiser.previous_frame(), Some(8));
}

#[test]
fn allocation_failure_is_propagated() {
    // Room for one bundle only.
    let per_bundle = 8 * EXTENT.texel_count() + 3 * EXTENT.downsampled(3).texel_count();
    let uploads = 3 * EXTENT.texel_count();
    let device = CpuDevice::new().with_memory_budget(per_bundle + uploads);
    let mut h = Harness::with_device(device, DenoiserConfig::default());
    let input = flat(EXTENT, 0.3);
    h.frame(&input);
    // Uploads of the first frame are gone by now; the second bundle is over budget.
    let err = h.try_frame(&input, &[ViewRecord::default()]).err().expect("second bundle must not fit");
    assert!(err.is_allocation_failure());
    assert_eq!(h.denoiser.pool_len(), 1);
}
