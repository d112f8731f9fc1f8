//! Denoiser configuration: filter iterations, history control, antilag, debug views.
//!
//! Lives across frames and may be changed between frames by a UI layer. Out-of-range
//! values come from live controls, so they are clamped rather than reported.

/// Internal buffer routed to the output instead of the filtered image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DebugView {
    #[default]
    Off,
    /// Variance estimate feeding the spatial filter.
    Variance,
    /// Per-pixel history length relative to `history_limit`.
    HistoryLength,
    /// Antilag factor derived from the gradient buffer.
    Gradient,
    /// The integrator is emitting an inspection quantity (normals, albedo, ...) in place
    /// of radiance. Accumulation proceeds on whatever it emits.
    Integrator(u32),
}

impl DebugView {
    /// Identifies what is being accumulated. History cannot survive a change of this key.
    pub fn accumulation_key(&self) -> Option<u32> {
        match self {
            DebugView::Integrator(mode) => Some(*mode),
            _ => None,
        }
    }
}

/// Gradient-based antilag (A-SVGF style).
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AntilagConfig {
    /// Active only when the integrator also supplies gradient samples.
    pub enabled: bool,
    /// Multiplier from normalized gradient to history suppression.
    pub scale: f32,
    /// À-trous iterations over the gradient buffer.
    pub filter_radius: u32,
    /// One gradient stratum per `downsample`×`downsample` pixels.
    pub downsample: u32,
}

impl Default for AntilagConfig {
    fn default() -> Self {
        Self { enabled: true, scale: 2.0, filter_radius: 2, downsample: 3 }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DenoiserConfig {
    /// Spatial filter passes; 0 disables spatial filtering.
    pub atrous_iterations: u32,
    /// Pass whose output becomes next frame's temporal history.
    pub history_tap_iteration: u32,
    /// Target effective sample count of the temporal blend.
    pub history_limit: u32,
    /// History length below which variance is estimated spatially.
    pub spatial_variance_frames: u32,
    pub phi_luminance: f32,
    pub phi_albedo: f32,
    pub phi_depth: f32,
    pub antilag: AntilagConfig,
    pub debug_view: DebugView,
}

impl Default for DenoiserConfig {
    fn default() -> Self {
        Self {
            atrous_iterations: 4,
            history_tap_iteration: 1,
            history_limit: 32,
            spatial_variance_frames: 4,
            phi_luminance: 4.0,
            phi_albedo: 8.0,
            phi_depth: 8.0,
            antilag: AntilagConfig::default(),
            debug_view: DebugView::Off,
        }
    }
}

impl DenoiserConfig {
    /// Copy with every value brought into its valid range.
    pub fn sanitized(&self) -> Self {
        let mut cfg = self.clone();
        cfg.history_limit = cfg.history_limit.max(1);
        cfg.history_tap_iteration = cfg.history_tap_iteration.min(cfg.atrous_iterations.saturating_sub(1));
        cfg.antilag.downsample = cfg.antilag.downsample.max(1);
        cfg.antilag.scale = finite_or(cfg.antilag.scale, 0.0).max(0.0);
        cfg.phi_luminance = finite_or(cfg.phi_luminance, 0.0).max(0.0);
        cfg.phi_albedo = finite_or(cfg.phi_albedo, 0.0).max(0.0);
        cfg.phi_depth = finite_or(cfg.phi_depth, 0.0).max(0.0);
        cfg
    }

    /// Tap pass index, or None when spatial filtering is off.
    pub fn history_tap(&self) -> Option<u32> {
        (self.atrous_iterations > 0)
            .then(|| self.history_tap_iteration.min(self.atrous_iterations - 1))
    }

    /// Defaults overridden by `AFTERGLOW_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg
    }

    /// Apply overrides from `lookup`; unparsable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_from(&lookup, "AFTERGLOW_ATROUS_ITERATIONS", &mut self.atrous_iterations);
        override_from(&lookup, "AFTERGLOW_HISTORY_TAP", &mut self.history_tap_iteration);
        override_from(&lookup, "AFTERGLOW_HISTORY_LIMIT", &mut self.history_limit);
        override_from(&lookup, "AFTERGLOW_ANTILAG", &mut self.antilag.enabled);
        override_from(&lookup, "AFTERGLOW_ANTILAG_SCALE", &mut self.antilag.scale);
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

fn override_from<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => log::warn!("ignoring {key}={raw:?}: not a valid value"),
    }
}
