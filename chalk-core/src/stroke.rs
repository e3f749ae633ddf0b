//! Stroke state machine and replay.
//!
//! ```text
//!            in-bounds point (dot)
//!   IDLE ─────────────────────────► STROKING ──┐ in-bounds point
//!    ▲                                 │  ▲    │ (interpolated run)
//!    │   out-of-bounds / lost contact  │  └────┘
//!    └─────────────────────────────────┘
//!          (one end-of-stroke command)
//! ```
//!
//! The sender replicates the sampled points, not the interpolated stamps.
//! Receivers rebuild the stamps with the same [`interpolate`] function, so
//! both sides end up with identical surfaces.

use serde::{Deserialize, Serialize};

use crate::color::Rgba;
use crate::error::InvariantViolation;
use crate::marker::MarkerId;
use crate::surface::{Surface, SurfaceId};

/// Integer pixel position on a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        f64::from(other.x - self.x).hypot(f64::from(other.y - self.y))
    }
}

/// Color and width a marker draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pen {
    pub color: Rgba,
    pub width: u32,
}

/// Atomic unit of surface mutation: a stamp, or a stroke terminator.
///
/// A terminator's `x`/`y` carry no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawCommand {
    pub x: i32,
    pub y: i32,
    pub color: Rgba,
    pub pen_width: u32,
    pub end_of_stroke: bool,
}

impl DrawCommand {
    pub fn stamp(point: Point, pen: Pen) -> Self {
        Self {
            x: point.x,
            y: point.y,
            color: pen.color,
            pen_width: pen.width,
            end_of_stroke: false,
        }
    }

    pub fn end_of_stroke(pen: Pen) -> Self {
        Self {
            x: 0,
            y: 0,
            color: pen.color,
            pen_width: pen.width,
            end_of_stroke: true,
        }
    }

    /// The stamped point, `None` for terminators.
    pub fn point(&self) -> Option<Point> {
        (!self.end_of_stroke).then_some(Point::new(self.x, self.y))
    }

    pub fn pen(&self) -> Pen {
        Pen {
            color: self.color,
            width: self.pen_width,
        }
    }
}

/// Stamps between `from` (exclusive) and `to` (inclusive).
///
/// Step count is `ceil(distance / (pen_width / 2))`. Positions are rounded
/// to the pixel grid; when rounding opens a gap wider than half the pen,
/// the step count grows until it closes or reaches the Chebyshev distance.
/// Pens narrower than 3 cannot bridge a diagonal pixel step, so their runs
/// get an axis-aligned corner stamp before every diagonal step: width 2 then
/// stays within half the pen and width 1 stays 4-connected.
/// A zero-length move produces nothing.
pub fn interpolate(from: Point, to: Point, pen: Pen) -> Vec<DrawCommand> {
    let distance = from.distance(&to);
    if distance == 0.0 {
        return Vec::new();
    }

    let spacing = f64::from(pen.width.max(1)) / 2.0;
    let chebyshev = (to.x - from.x).unsigned_abs().max((to.y - from.y).unsigned_abs());
    let mut steps = (distance / spacing).ceil() as u32;

    let points = loop {
        let points = lerp_points(from, to, steps);
        if steps >= chebyshev || max_gap(from, &points) <= spacing {
            break points;
        }
        steps += (steps / 8).max(1);
    };
    let points = if spacing < std::f64::consts::SQRT_2 {
        with_corners(from, points)
    } else {
        points
    };
    points.into_iter().map(|p| DrawCommand::stamp(p, pen)).collect()
}

/// Split every diagonal step of an 8-connected run into two axis steps.
fn with_corners(from: Point, points: Vec<Point>) -> Vec<Point> {
    let mut out = Vec::with_capacity(points.len() * 2);
    let mut prev = from;
    for p in points {
        if p.x != prev.x && p.y != prev.y {
            out.push(Point::new(p.x, prev.y));
        }
        out.push(p);
        prev = p;
    }
    out
}

fn lerp_points(from: Point, to: Point, steps: u32) -> Vec<Point> {
    let dx = f64::from(to.x - from.x);
    let dy = f64::from(to.y - from.y);
    let mut points: Vec<Point> = Vec::with_capacity(steps as usize);
    for i in 1..=steps {
        let t = f64::from(i) / f64::from(steps);
        let p = Point::new(
            (f64::from(from.x) + dx * t).round() as i32,
            (f64::from(from.y) + dy * t).round() as i32,
        );
        if points.last() != Some(&p) {
            points.push(p);
        }
    }
    points
}

fn max_gap(from: Point, points: &[Point]) -> f64 {
    let mut prev = from;
    let mut gap = 0.0_f64;
    for p in points {
        gap = gap.max(prev.distance(p));
        prev = *p;
    }
    gap
}

/// Result of feeding one sample into a [`StrokeSession`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrokeStep {
    /// Command to replicate, if any.
    pub wire: Option<DrawCommand>,
    /// Stamps to apply to the local surface.
    pub stamps: Vec<DrawCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrokeState {
    Idle,
    Stroking { surface: SurfaceId, last: Point },
}

/// Per-marker state of the stroke in progress.
///
/// `last_point()` is `Some` exactly when the session is stroking.
#[derive(Debug, Clone)]
pub struct StrokeSession {
    marker: MarkerId,
    state: StrokeState,
}

impl StrokeSession {
    pub fn new(marker: MarkerId) -> Self {
        Self {
            marker,
            state: StrokeState::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, StrokeState::Stroking { .. })
    }

    pub fn last_point(&self) -> Option<Point> {
        match self.state {
            StrokeState::Stroking { last, .. } => Some(last),
            StrokeState::Idle => None,
        }
    }

    /// Surface of the active stroke.
    pub fn surface(&self) -> Option<SurfaceId> {
        match self.state {
            StrokeState::Stroking { surface, .. } => Some(surface),
            StrokeState::Idle => None,
        }
    }

    /// Feed the marker's contact point for this tick.
    ///
    /// Out-of-bounds points end the stroke. A point on a different surface
    /// than the active stroke is a defect in the caller.
    pub fn sample(
        &mut self,
        surface: &Surface,
        point: Point,
        in_bounds: bool,
        pen: Pen,
    ) -> Result<StrokeStep, InvariantViolation> {
        if let StrokeState::Stroking { surface: active, .. } = self.state {
            if active != surface.id() {
                return Err(InvariantViolation::ConcurrentStroke {
                    marker: self.marker,
                    active,
                    requested: surface.id(),
                });
            }
        }

        if !in_bounds || !surface.contains(point.x, point.y) {
            return Ok(self.release(pen));
        }

        let step = match self.state {
            StrokeState::Idle => StrokeStep {
                wire: Some(DrawCommand::stamp(point, pen)),
                stamps: vec![DrawCommand::stamp(point, pen)],
            },
            StrokeState::Stroking { last, .. } if last == point => StrokeStep::default(),
            StrokeState::Stroking { last, .. } => StrokeStep {
                wire: Some(DrawCommand::stamp(point, pen)),
                stamps: interpolate(last, point, pen),
            },
        };

        self.state = StrokeState::Stroking {
            surface: surface.id(),
            last: point,
        };
        Ok(step)
    }

    /// Contact lost. Emits one terminator if a stroke was active.
    pub fn release(&mut self, pen: Pen) -> StrokeStep {
        match std::mem::replace(&mut self.state, StrokeState::Idle) {
            StrokeState::Stroking { .. } => StrokeStep {
                wire: Some(DrawCommand::end_of_stroke(pen)),
                stamps: Vec::new(),
            },
            StrokeState::Idle => StrokeStep::default(),
        }
    }
}

/// Receiver-side interpolation anchor for one marker.
#[derive(Debug, Clone, Default)]
pub struct ReplayAnchor {
    last: Option<Point>,
}

impl ReplayAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_point(&self) -> Option<Point> {
        self.last
    }

    /// Stamps produced by a replicated command.
    ///
    /// A terminator (or an out-of-bounds point) resets the anchor, so the
    /// next point is drawn as a standalone dot.
    pub fn replay(&mut self, surface: &Surface, cmd: &DrawCommand) -> Vec<DrawCommand> {
        let Some(point) = cmd.point() else {
            self.last = None;
            return Vec::new();
        };
        if !surface.contains(point.x, point.y) {
            self.last = None;
            return Vec::new();
        }

        let stamps = match self.last {
            Some(last) => interpolate(last, point, cmd.pen()),
            None => vec![*cmd],
        };
        self.last = Some(point);
        stamps
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// One marker's contact with a surface, as reported by the input layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSample {
    pub marker: MarkerId,
    pub surface: SurfaceId,
    pub x: i32,
    pub y: i32,
    pub in_bounds: bool,
}

/// All contacts for one tick. Markers without a sample have lost contact.
#[derive(Debug, Clone, Default)]
pub struct InputSnapshot {
    pub samples: Vec<InputSample>,
}

impl InputSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(mut self, marker: MarkerId, surface: SurfaceId, x: i32, y: i32) -> Self {
        self.samples.push(InputSample {
            marker,
            surface,
            x,
            y,
            in_bounds: true,
        });
        self
    }

    pub fn sample_for(&self, marker: MarkerId) -> Option<&InputSample> {
        self.samples.iter().find(|s| s.marker == marker)
    }
}
