//! Per-marker colour and pen width.
//!
//! Both values follow the same protocol: `set` applies locally right away and
//! produces (or schedules) a replicated update; `apply_remote` performs the
//! same mutation without re-broadcasting. Conflicts resolve last-writer-wins.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::color::Rgba;

/// Identifies a marker (a pen held by some user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarkerId(pub u32);

pub const DEFAULT_PEN_WIDTH: u32 = 5;
pub const MIN_PEN_WIDTH: u32 = 1;
pub const MAX_PEN_WIDTH: u32 = 256;

/// Minimum spacing between outbound pen-size updates.
pub const PEN_SIZE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorUpdate {
    pub marker: MarkerId,
    pub color: Rgba,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenSizeUpdate {
    pub marker: MarkerId,
    pub size: u32,
}

/// Authoritative colour of one marker.
#[derive(Debug, Clone)]
pub struct ColorState {
    marker: MarkerId,
    color: Rgba,
}

impl ColorState {
    /// Erasers start black, everything else white.
    pub fn new(marker: MarkerId, eraser: bool) -> Self {
        let color = if eraser { Rgba::BLACK } else { Rgba::WHITE };
        Self { marker, color }
    }

    pub fn color(&self) -> Rgba {
        self.color
    }

    /// Local change. Colour updates go out immediately; `None` if unchanged.
    pub fn set(&mut self, color: Rgba) -> Option<ColorUpdate> {
        if self.color == color {
            return None;
        }
        self.color = color;
        Some(ColorUpdate {
            marker: self.marker,
            color,
        })
    }

    pub fn apply_remote(&mut self, update: &ColorUpdate) {
        if update.marker != self.marker {
            log::warn!(
                "Color update for {:?} delivered to {:?}",
                update.marker,
                self.marker
            );
            return;
        }
        self.color = update.color;
    }
}

/// Authoritative pen width of one marker, with a trailing-edge send throttle.
///
/// Rapid changes coalesce: only the latest value is sent, at most once per
/// interval.
#[derive(Debug, Clone)]
pub struct PenSizeState {
    marker: MarkerId,
    size: u32,
    interval: Duration,
    pending_since: Option<Instant>,
    last_sent: Option<Instant>,
}

impl PenSizeState {
    pub fn new(marker: MarkerId) -> Self {
        Self::with_interval(marker, PEN_SIZE_INTERVAL)
    }

    /// Custom throttle interval (for tests).
    pub fn with_interval(marker: MarkerId, interval: Duration) -> Self {
        Self {
            marker,
            size: DEFAULT_PEN_WIDTH,
            interval,
            pending_since: None,
            last_sent: None,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn has_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Local change, clamped to the valid range. Returns the applied width.
    pub fn set(&mut self, size: u32, now: Instant) -> u32 {
        let clamped = size.clamp(MIN_PEN_WIDTH, MAX_PEN_WIDTH);
        if clamped != size {
            log::debug!("Pen width {} clamped to {}", size, clamped);
        }
        if clamped != self.size {
            self.size = clamped;
            self.pending_since.get_or_insert(now);
        }
        clamped
    }

    /// Emit the coalesced update once the interval has passed since the first
    /// pending change and since the previous send.
    pub fn poll_outbound(&mut self, now: Instant) -> Option<PenSizeUpdate> {
        let since = self.pending_since?;
        if now.saturating_duration_since(since) < self.interval {
            return None;
        }
        if let Some(sent) = self.last_sent {
            if now.saturating_duration_since(sent) < self.interval {
                return None;
            }
        }
        self.pending_since = None;
        self.last_sent = Some(now);
        Some(PenSizeUpdate {
            marker: self.marker,
            size: self.size,
        })
    }

    /// Remote change. Out-of-range widths are rejected; returns whether the
    /// update was applied. An applied update supersedes a pending local one.
    pub fn apply_remote(&mut self, update: &PenSizeUpdate) -> bool {
        if update.marker != self.marker {
            log::warn!(
                "Pen size update for {:?} delivered to {:?}",
                update.marker,
                self.marker
            );
            return false;
        }
        if !(MIN_PEN_WIDTH..=MAX_PEN_WIDTH).contains(&update.size) {
            log::warn!(
                "Rejected pen width {} for {:?}: outside {}..={}",
                update.size,
                self.marker,
                MIN_PEN_WIDTH,
                MAX_PEN_WIDTH
            );
            return false;
        }
        self.size = update.size;
        self.pending_since = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: MarkerId = MarkerId(1);

    #[test]
    fn test_color_defaults() {
        assert_eq!(ColorState::new(M, false).color(), Rgba::WHITE);
        assert_eq!(ColorState::new(M, true).color(), Rgba::BLACK);
    }

    #[test]
    fn test_color_set_emits_once() {
        let mut state = ColorState::new(M, false);
        let red = Rgba::rgb(255, 0, 0);
        assert_eq!(state.set(red), Some(ColorUpdate { marker: M, color: red }));
        assert_eq!(state.set(red), None);
    }

    #[test]
    fn test_color_remote_last_writer_wins() {
        let mut state = ColorState::new(M, false);
        state.set(Rgba::rgb(1, 2, 3));
        state.apply_remote(&ColorUpdate {
            marker: M,
            color: Rgba::rgb(9, 9, 9),
        });
        assert_eq!(state.color(), Rgba::rgb(9, 9, 9));

        state.apply_remote(&ColorUpdate {
            marker: MarkerId(2),
            color: Rgba::BLACK,
        });
        assert_eq!(state.color(), Rgba::rgb(9, 9, 9));
    }

    #[test]
    fn test_pen_size_coalesces_burst() {
        let t0 = Instant::now();
        let mut state = PenSizeState::new(M);

        let mut sent = Vec::new();
        for i in 0..10u32 {
            let now = t0 + Duration::from_millis(u64::from(i) * 5);
            state.set(6 + i, now);
            sent.extend(state.poll_outbound(now));
        }
        assert!(sent.is_empty());

        sent.extend(state.poll_outbound(t0 + Duration::from_millis(100)));
        assert_eq!(sent, vec![PenSizeUpdate { marker: M, size: 15 }]);
        assert!(state.poll_outbound(t0 + Duration::from_millis(500)).is_none());
    }

    #[test]
    fn test_pen_size_spacing_between_sends() {
        let t0 = Instant::now();
        let mut state = PenSizeState::with_interval(M, Duration::from_millis(100));

        state.set(8, t0);
        assert!(state.poll_outbound(t0 + Duration::from_millis(100)).is_some());

        // A change right after a send waits out the full interval.
        state.set(9, t0 + Duration::from_millis(150));
        assert!(state.poll_outbound(t0 + Duration::from_millis(199)).is_none());
        let update = state.poll_outbound(t0 + Duration::from_millis(250)).unwrap();
        assert_eq!(update.size, 9);
    }

    #[test]
    fn test_pen_size_clamped_locally() {
        let mut state = PenSizeState::new(M);
        assert_eq!(state.set(0, Instant::now()), MIN_PEN_WIDTH);
        assert_eq!(state.set(10_000, Instant::now()), MAX_PEN_WIDTH);
        assert_eq!(state.size(), MAX_PEN_WIDTH);
    }

    #[test]
    fn test_pen_size_unchanged_is_not_pending() {
        let mut state = PenSizeState::new(M);
        state.set(DEFAULT_PEN_WIDTH, Instant::now());
        assert!(!state.has_pending());
    }

    #[test]
    fn test_pen_size_remote_validation() {
        let mut state = PenSizeState::new(M);
        assert!(!state.apply_remote(&PenSizeUpdate { marker: M, size: 0 }));
        assert!(!state.apply_remote(&PenSizeUpdate { marker: M, size: 257 }));
        assert_eq!(state.size(), DEFAULT_PEN_WIDTH);

        state.set(20, Instant::now());
        assert!(state.apply_remote(&PenSizeUpdate { marker: M, size: 12 }));
        assert_eq!(state.size(), 12);
        assert!(!state.has_pending());
    }
}
