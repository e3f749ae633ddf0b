//! Per-surface record of applied draw commands.
//!
//! The log mirrors what is on the surface: local stamps and replayed remote
//! stamps both land here. Clearing walks the history and over-paints every
//! stamp in the background colour, then forgets it.
//!
//! ```text
//! stamp ──► SurfaceRenderer ──► pixels
//!   │
//!   └────► DrawCommandLog ──(clear)──► re-stamp in background, empty
//! ```

use std::collections::BTreeMap;

use crate::color::Rgba;
use crate::stroke::DrawCommand;
use crate::surface::{Surface, SurfaceId, SurfaceRenderer};

/// Extra pixels added to the pen width when erasing, so anti-aliased or
/// rounded edges left by the renderer are covered too.
pub const CLEAR_MARGIN: u32 = 2;

/// Ordered draw history of one surface.
#[derive(Debug, Clone, Default)]
pub struct DrawCommandLog {
    commands: Vec<DrawCommand>,
}

impl DrawCommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an applied command. Terminators carry no pixels and are skipped.
    pub fn record(&mut self, cmd: DrawCommand) {
        if !cmd.end_of_stroke {
            self.commands.push(cmd);
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DrawCommand> {
        self.commands.iter()
    }

    /// Over-paint every logged stamp with `background`, then empty the log.
    ///
    /// Returns the number of stamps erased.
    pub fn clear<R: SurfaceRenderer + ?Sized>(
        &mut self,
        surface: &Surface,
        renderer: &mut R,
        background: Rgba,
    ) -> usize {
        let erased = self.commands.len();
        for cmd in self.commands.drain(..) {
            renderer.stamp_surface(
                surface,
                cmd.x,
                cmd.y,
                cmd.pen_width.saturating_add(CLEAR_MARGIN),
                background,
            );
        }
        erased
    }
}

/// Command count per surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub per_surface: BTreeMap<SurfaceId, usize>,
    pub total: usize,
}

/// Maps each surface to its [`DrawCommandLog`].
#[derive(Debug, Default)]
pub struct DrawnDataIndex {
    logs: BTreeMap<SurfaceId, DrawCommandLog>,
}

impl DrawnDataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, surface: SurfaceId, cmd: DrawCommand) {
        self.logs.entry(surface).or_default().record(cmd);
    }

    pub fn log(&self, surface: SurfaceId) -> Option<&DrawCommandLog> {
        self.logs.get(&surface)
    }

    /// Clear one surface. A surface with no history is left alone.
    pub fn clear<R: SurfaceRenderer + ?Sized>(
        &mut self,
        surface: &Surface,
        renderer: &mut R,
        background: Rgba,
    ) -> usize {
        match self.logs.get_mut(&surface.id()) {
            Some(log) => {
                let erased = log.clear(surface, renderer, background);
                log::debug!("Cleared {:?}: {} stamps erased", surface.id(), erased);
                erased
            }
            None => 0,
        }
    }

    pub fn stats(&self) -> HistoryStats {
        let per_surface: BTreeMap<SurfaceId, usize> = self
            .logs
            .iter()
            .map(|(id, log)| (*id, log.len()))
            .collect();
        let total = per_surface.values().sum();
        HistoryStats { per_surface, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::{Pen, Point};
    use crate::surface::BitmapRenderer;

    const RED: Rgba = Rgba::rgb(255, 0, 0);

    fn pen(width: u32) -> Pen {
        Pen { color: RED, width }
    }

    #[test]
    fn test_terminators_not_logged() {
        let mut log = DrawCommandLog::new();
        log.record(DrawCommand::stamp(Point::new(1, 1), pen(4)));
        log.record(DrawCommand::end_of_stroke(pen(4)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_clear_restores_background() {
        let surface = Surface::new(SurfaceId(0), 64, 64);
        let mut renderer = BitmapRenderer::new(Rgba::BLACK);
        let blank = renderer.checksum(&surface);
        let mut index = DrawnDataIndex::new();

        for (x, y, w) in [(10, 10, 5), (40, 20, 9), (63, 63, 3), (0, 30, 1)] {
            let cmd = DrawCommand::stamp(Point::new(x, y), pen(w));
            renderer.stamp_surface(&surface, cmd.x, cmd.y, cmd.pen_width, cmd.color);
            index.record(surface.id(), cmd);
        }
        assert_ne!(renderer.checksum(&surface), blank);

        assert_eq!(index.clear(&surface, &mut renderer, Rgba::BLACK), 4);
        assert_eq!(renderer.checksum(&surface), blank);
        assert!(index.log(surface.id()).unwrap().is_empty());
    }

    #[test]
    fn test_clear_only_touches_target_surface() {
        let a = Surface::new(SurfaceId(0), 16, 16);
        let b = Surface::new(SurfaceId(1), 16, 16);
        let mut renderer = BitmapRenderer::new(Rgba::BLACK);
        let mut index = DrawnDataIndex::new();

        for s in [&a, &b] {
            let cmd = DrawCommand::stamp(Point::new(8, 8), pen(4));
            renderer.stamp_surface(s, cmd.x, cmd.y, cmd.pen_width, cmd.color);
            index.record(s.id(), cmd);
        }

        index.clear(&a, &mut renderer, Rgba::BLACK);
        assert_eq!(renderer.pixel(&a, 8, 8), Some(Rgba::BLACK));
        assert_eq!(renderer.pixel(&b, 8, 8), Some(RED));

        let stats = index.stats();
        assert_eq!(stats.per_surface.get(&SurfaceId(0)), Some(&0));
        assert_eq!(stats.per_surface.get(&SurfaceId(1)), Some(&1));
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn test_clear_unknown_surface() {
        let surface = Surface::new(SurfaceId(7), 8, 8);
        let mut renderer = BitmapRenderer::new(Rgba::BLACK);
        let mut index = DrawnDataIndex::new();
        assert_eq!(index.clear(&surface, &mut renderer, Rgba::BLACK), 0);
    }
}
