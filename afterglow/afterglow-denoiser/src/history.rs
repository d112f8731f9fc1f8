//! When accumulated history may be trusted, and the accumulated-frame counter.

use render_api::{Extent, ViewRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidationReason {
    /// No previous frame exists.
    ColdStart,
    ExtentChanged,
    ResetRequested,
    /// The camera changed and no motion vectors are there to follow it.
    CameraMoved,
    /// The integrator now emits a different quantity.
    DebugModeChanged,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            InvalidationReason::ColdStart => "cold start",
            InvalidationReason::ExtentChanged => "extent changed",
            InvalidationReason::ResetRequested => "reset requested",
            InvalidationReason::CameraMoved => "camera moved without motion vectors",
            InvalidationReason::DebugModeChanged => "debug mode changed",
        };
        f.write_str(text)
    }
}

/// What is known about this frame when deciding.
#[derive(Clone, Copy, Debug)]
pub struct HistoryQuery<'a> {
    pub extent: Extent,
    /// Extent of the previous bundle's images, None when there is no previous bundle.
    pub previous_extent: Option<Extent>,
    pub views: &'a [ViewRecord],
    pub has_motion: bool,
    pub accumulation_key: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryDecision {
    pub invalidation: Option<InvalidationReason>,
    /// Consecutive valid-history frames including this one; 0 when invalidated.
    pub accumulated_frames: u32,
}

impl HistoryDecision {
    pub fn is_valid(&self) -> bool {
        self.invalidation.is_none()
    }

    /// Frames accumulated before this one; drives `1 / min(n + 1, limit)`.
    pub fn prior_frames(&self) -> u32 {
        self.accumulated_frames.saturating_sub(1)
    }
}

#[derive(Debug, Default)]
pub struct HistoryControl {
    reset_requested: bool,
    last_views: Vec<ViewRecord>,
    last_key: Option<u32>,
    accumulated_frames: u32,
}

impl HistoryControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop history on the next evaluation.
    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    pub fn reset_pending(&self) -> bool {
        self.reset_requested
    }

    pub fn accumulated_frames(&self) -> u32 {
        self.accumulated_frames
    }

    /// Decide for this frame and record it. Consumes a pending reset request.
    pub fn evaluate(&mut self, query: &HistoryQuery<'_>) -> HistoryDecision {
        let invalidation = self.check(query);
        self.reset_requested = false;
        self.last_views.clear();
        self.last_views.extend_from_slice(query.views);
        self.last_key = query.accumulation_key;
        self.accumulated_frames = match invalidation {
            Some(reason) => {
                log::debug!("history invalidated: {reason}");
                0
            }
            None => self.accumulated_frames.saturating_add(1),
        };
        HistoryDecision { invalidation, accumulated_frames: self.accumulated_frames }
    }

    fn check(&self, query: &HistoryQuery<'_>) -> Option<InvalidationReason> {
        let Some(previous_extent) = query.previous_extent else {
            return Some(InvalidationReason::ColdStart);
        };
        if previous_extent != query.extent {
            return Some(InvalidationReason::ExtentChanged);
        }
        if self.reset_requested {
            return Some(InvalidationReason::ResetRequested);
        }
        if self.last_key != query.accumulation_key {
            return Some(InvalidationReason::DebugModeChanged);
        }
        if !query.has_motion && !same_views(&self.last_views, query.views) {
            return Some(InvalidationReason::CameraMoved);
        }
        None
    }
}

fn same_views(a: &[ViewRecord], b: &[ViewRecord]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_transform(y))
}
