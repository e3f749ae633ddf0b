//! The whiteboard aggregate.
//!
//! Owns the surfaces, per-marker state, draw history, page selection and
//! paste tasks of one whiteboard group, and drives them from an external
//! tick loop:
//!
//! ```text
//!  driver loop ──► tick(input, now) ──► StrokeSession ──► renderer + history
//!       │                                     │
//!       │                                     └──► outbox ──► take_outbound()
//!       │
//!       └──► apply_remote(sender, msg) ──► ReplayAnchor ──► renderer + history
//! ```
//!
//! Everything here runs on the tick thread. Inbound messages are applied only
//! when the driver calls [`Whiteboard::apply_remote`], never from a transport
//! callback.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::color::Rgba;
use crate::config::{MarkerConfig, WhiteboardConfig};
use crate::error::{InvariantViolation, LoadError};
use crate::history::DrawnDataIndex;
use crate::marker::{
    ColorState, ColorUpdate, MarkerId, PenSizeState, PenSizeUpdate, MAX_PEN_WIDTH, MIN_PEN_WIDTH,
};
use crate::page::{PageChange, PageDirection, PageSelector};
use crate::paste::{
    DecodedImage, ImageLoader, ImagePaste, PasteProgress, PasteStage, PasteStatus, PasteTask,
};
use crate::stroke::{DrawCommand, InputSnapshot, Pen, Point, ReplayAnchor, StrokeSession};
use crate::surface::{Surface, SurfaceId, SurfaceRenderer};

/// A replicated draw command, tagged with the marker and surface it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawMessage {
    pub marker: MarkerId,
    pub surface: SurfaceId,
    pub command: DrawCommand,
}

/// Every state change that crosses the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoardMessage {
    Draw(DrawMessage),
    Color(ColorUpdate),
    PenSize(PenSizeUpdate),
    Page(PageChange),
    Paste(ImagePaste),
}

/// Receiver-side stroke state for one marker.
#[derive(Debug, Default)]
struct RemoteStroke {
    anchor: ReplayAnchor,
    driver: Option<Uuid>,
    surface: Option<SurfaceId>,
}

struct MarkerSlot {
    session: StrokeSession,
    color: ColorState,
    pen: PenSizeState,
    remote: RemoteStroke,
    bound: SurfaceId,
}

impl MarkerSlot {
    fn new(config: &MarkerConfig, board: &WhiteboardConfig, bound: SurfaceId) -> Self {
        let id = config.marker_id();
        Self {
            session: StrokeSession::new(id),
            color: ColorState::new(id, config.eraser),
            pen: PenSizeState::with_interval(id, board.pen_size_interval()),
            remote: RemoteStroke::default(),
            bound,
        }
    }

    fn pen(&self) -> Pen {
        Pen {
            color: self.color.color(),
            width: self.pen.size(),
        }
    }
}

/// Loader used until one is installed: every source is missing.
struct NoImages;

impl ImageLoader for NoImages {
    fn exists(&self, _source: &str) -> bool {
        false
    }

    fn decode(&self, source: &str) -> Result<DecodedImage, LoadError> {
        Err(LoadError::NotFound(source.to_string()))
    }
}

pub struct Whiteboard<R: SurfaceRenderer> {
    config: WhiteboardConfig,
    renderer: R,
    surfaces: Vec<Surface>,
    pages: PageSelector,
    markers: BTreeMap<MarkerId, MarkerSlot>,
    history: DrawnDataIndex,
    loader: Box<dyn ImageLoader + Send>,
    paste: Option<PasteTask>,
    incoming: VecDeque<PasteTask>,
    paste_status: PasteStatus,
    ghost_hidden: bool,
    outbox: Vec<BoardMessage>,
    running: bool,
}

impl<R: SurfaceRenderer> Whiteboard<R> {
    pub fn init(config: WhiteboardConfig, renderer: R) -> Self {
        let pages = PageSelector::new(config.pages);
        let surfaces = (0..pages.page_count())
            .map(|i| Surface::new(SurfaceId(i), config.surface_width, config.surface_height))
            .collect();
        let active = pages.active_surface();
        let markers = config
            .markers
            .iter()
            .map(|m| (m.marker_id(), MarkerSlot::new(m, &config, active)))
            .collect();

        log::info!(
            "Whiteboard ready: {} page(s) of {}x{}, {} marker(s)",
            pages.page_count(),
            config.surface_width,
            config.surface_height,
            config.markers.len()
        );

        Self {
            config,
            renderer,
            surfaces,
            pages,
            markers,
            history: DrawnDataIndex::new(),
            loader: Box::new(NoImages),
            paste: None,
            incoming: VecDeque::new(),
            paste_status: PasteStatus::Idle,
            ghost_hidden: false,
            outbox: Vec::new(),
            running: true,
        }
    }

    pub fn with_loader(mut self, loader: impl ImageLoader + Send + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    // ───────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────

    pub fn config(&self) -> &WhiteboardConfig {
        &self.config
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(id.0 as usize)
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn active_surface(&self) -> &Surface {
        &self.surfaces[self.pages.current() as usize]
    }

    pub fn current_page(&self) -> u32 {
        self.pages.current()
    }

    pub fn page_label(&self) -> String {
        self.pages.page_label()
    }

    pub fn history(&self) -> &DrawnDataIndex {
        &self.history
    }

    pub fn marker_ids(&self) -> impl Iterator<Item = MarkerId> + '_ {
        self.markers.keys().copied()
    }

    pub fn color(&self, marker: MarkerId) -> Option<Rgba> {
        self.markers.get(&marker).map(|m| m.color.color())
    }

    pub fn pen_size(&self, marker: MarkerId) -> Option<u32> {
        self.markers.get(&marker).map(|m| m.pen.size())
    }

    pub fn is_stroking(&self, marker: MarkerId) -> bool {
        self.markers
            .get(&marker)
            .is_some_and(|m| m.session.is_active())
    }

    /// Surface the marker is bound to (always the active page).
    pub fn bound_surface(&self, marker: MarkerId) -> Option<SurfaceId> {
        self.markers.get(&marker).map(|m| m.bound)
    }

    pub fn paste_status(&self) -> PasteStatus {
        self.paste_status
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Drain everything queued for replication since the last call.
    pub fn take_outbound(&mut self) -> Vec<BoardMessage> {
        std::mem::take(&mut self.outbox)
    }

    // ───────────────────────────────────────────────────────────────
    // Tick
    // ───────────────────────────────────────────────────────────────

    /// One logical frame: sample every marker, flush throttled pen sizes and
    /// advance paste tasks by one stage.
    pub fn tick(&mut self, input: &InputSnapshot, now: Instant) {
        if !self.running {
            return;
        }

        let active = self.pages.active_surface();
        let mut applied: Vec<(SurfaceId, Vec<DrawCommand>)> = Vec::new();
        let mut pen_updates = Vec::new();

        for (id, slot) in self.markers.iter_mut() {
            let pen = slot.pen();
            let stroke_surface = slot.session.surface();

            let step = match input.sample_for(*id) {
                Some(sample) => {
                    let Some(surface) = self.surfaces.get(sample.surface.0 as usize) else {
                        InvariantViolation::UnknownSurface(sample.surface).report();
                        continue;
                    };
                    if stroke_surface.is_none() && sample.surface != slot.bound {
                        log::trace!("{:?} touched inactive {:?}", id, sample.surface);
                        continue;
                    }
                    let point = Point::new(sample.x, sample.y);
                    match slot.session.sample(surface, point, sample.in_bounds, pen) {
                        Ok(step) => step,
                        Err(violation) => {
                            violation.report();
                            continue;
                        }
                    }
                }
                None => slot.session.release(pen),
            };

            let surface = slot.session.surface().or(stroke_surface).unwrap_or(active);
            if let Some(command) = step.wire {
                self.outbox.push(BoardMessage::Draw(DrawMessage {
                    marker: *id,
                    surface,
                    command,
                }));
            }
            if !step.stamps.is_empty() {
                applied.push((surface, step.stamps));
            }
            if let Some(update) = slot.pen.poll_outbound(now) {
                pen_updates.push(update);
            }
        }

        for (surface, stamps) in applied {
            self.apply_stamps(surface, &stamps);
        }
        self.outbox
            .extend(pen_updates.into_iter().map(BoardMessage::PenSize));

        self.advance_pastes();
        self.settle_ghost();
    }

    // ───────────────────────────────────────────────────────────────
    // Local operations
    // ───────────────────────────────────────────────────────────────

    pub fn set_color(&mut self, marker: MarkerId, color: Rgba) -> Result<(), InvariantViolation> {
        let slot = self
            .markers
            .get_mut(&marker)
            .ok_or(InvariantViolation::UnknownMarker(marker))?;
        if let Some(update) = slot.color.set(color) {
            self.outbox.push(BoardMessage::Color(update));
        }
        Ok(())
    }

    /// Applies immediately; the update itself goes out on a later tick once
    /// the throttle allows. Returns the (clamped) width.
    pub fn set_pen_size(
        &mut self,
        marker: MarkerId,
        size: u32,
        now: Instant,
    ) -> Result<u32, InvariantViolation> {
        let slot = self
            .markers
            .get_mut(&marker)
            .ok_or(InvariantViolation::UnknownMarker(marker))?;
        Ok(slot.pen.set(size, now))
    }

    /// Move one page. At a bound nothing happens and nothing is sent.
    pub fn switch_page(&mut self, direction: PageDirection) -> bool {
        if !self.change_page(direction) {
            return false;
        }
        self.outbox.push(BoardMessage::Page(PageChange { direction }));
        true
    }

    /// Erase the active page. Local only.
    pub fn clear_page(&mut self) -> usize {
        let id = self.pages.active_surface();
        self.lift_ghost(id);
        let surface = &self.surfaces[id.0 as usize];
        let erased = self
            .history
            .clear(surface, &mut self.renderer, self.config.background);
        self.settle_ghost();
        log::info!("Cleared {} ({} stamps)", self.pages.page_label(), erased);
        erased
    }

    /// Start loading `source` for a ghost preview on the active page.
    /// Replaces any paste already in progress.
    pub fn begin_paste(&mut self, source: impl Into<String>) {
        self.cancel_paste();
        let task = PasteTask::local(source, self.pages.active_surface());
        log::info!("Loading image '{}'", task.source());
        self.paste_status = task.status();
        self.paste = Some(task);
    }

    /// Move the ghost to normalised `(x, y)`.
    pub fn move_paste(&mut self, x: f32, y: f32) {
        if let Some(task) = self.paste.as_mut().filter(|t| t.is_previewing()) {
            let surface = &self.surfaces[task.surface().0 as usize];
            task.move_to(x, y, &mut self.renderer, surface);
        }
    }

    pub fn scale_paste(&mut self, factor: f32) {
        if let Some(task) = self.paste.as_mut().filter(|t| t.is_previewing()) {
            let surface = &self.surfaces[task.surface().0 as usize];
            task.scale(factor, &mut self.renderer, surface);
        }
    }

    /// Commit the previewed image and replicate it. `false` if nothing was
    /// being previewed.
    pub fn confirm_paste(&mut self) -> bool {
        let Some(mut task) = self.paste.take() else {
            return false;
        };
        if !task.is_previewing() {
            self.paste = Some(task);
            return false;
        }
        let surface = &self.surfaces[task.surface().0 as usize];
        let confirmed = task.confirm(&mut self.renderer, surface);
        self.ghost_hidden = false;
        self.refresh_paste_status();
        match confirmed {
            Some(paste) => {
                self.outbox.push(BoardMessage::Paste(paste));
                true
            }
            None => false,
        }
    }

    /// Abort the local paste at whatever stage it is in.
    pub fn cancel_paste(&mut self) {
        if let Some(mut task) = self.paste.take() {
            let surface = &self.surfaces[task.surface().0 as usize];
            if self.ghost_hidden {
                task.recapture(&mut self.renderer, surface);
                self.ghost_hidden = false;
            }
            task.cancel(&mut self.renderer, surface);
        }
        if self.paste_status == PasteStatus::Failed {
            self.paste_status = PasteStatus::Idle;
        }
        self.refresh_paste_status();
    }

    /// End every stroke and drop pending work. Terminators for open strokes
    /// are left in the outbox for the driver's final flush.
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.end_strokes();
        self.cancel_paste();
        self.incoming.clear();
        self.running = false;
        log::info!("Whiteboard shut down ({} stamps logged)", self.history.stats().total);
    }

    // ───────────────────────────────────────────────────────────────
    // Remote
    // ───────────────────────────────────────────────────────────────

    /// Apply a message relayed from `sender`. Never re-broadcasts.
    pub fn apply_remote(&mut self, sender: Uuid, message: BoardMessage) {
        if !self.running {
            return;
        }
        match message {
            BoardMessage::Draw(draw) => self.replay_draw(sender, draw),
            BoardMessage::Color(update) => match self.markers.get_mut(&update.marker) {
                Some(slot) => slot.color.apply_remote(&update),
                None => log::warn!("Color update for unknown {:?}", update.marker),
            },
            BoardMessage::PenSize(update) => match self.markers.get_mut(&update.marker) {
                Some(slot) => {
                    slot.pen.apply_remote(&update);
                }
                None => log::warn!("Pen size update for unknown {:?}", update.marker),
            },
            BoardMessage::Page(change) => {
                if !self.change_page(change.direction) {
                    log::debug!(
                        "Ignoring page change {} at {}",
                        change.direction,
                        self.pages.page_label()
                    );
                }
            }
            BoardMessage::Paste(paste) => {
                if self.surface(paste.surface).is_none() || !paste.placement.is_valid() {
                    log::warn!("Dropping invalid image paste from {}", sender);
                    return;
                }
                log::info!("Incoming image '{}' from {}", paste.source, sender);
                self.incoming.push_back(PasteTask::remote(paste));
                self.refresh_paste_status();
            }
        }
        self.settle_ghost();
    }

    /// `peer` disconnected: strokes it was drawing are cut.
    pub fn peer_left(&mut self, peer: Uuid) {
        let reset = self.reset_anchors(peer);
        log::debug!("Peer {} left, {} anchor(s) reset", peer, reset);
    }

    /// Frames from `sender` were lost; its next point starts a fresh stroke.
    pub fn sequence_gap(&mut self, sender: Uuid) {
        let reset = self.reset_anchors(sender);
        log::debug!("Sequence gap from {}, {} anchor(s) reset", sender, reset);
    }

    fn replay_draw(&mut self, sender: Uuid, draw: DrawMessage) {
        let command = draw.command;
        if !command.end_of_stroke && !(MIN_PEN_WIDTH..=MAX_PEN_WIDTH).contains(&command.pen_width)
        {
            log::warn!(
                "Dropping draw with pen width {} from {}",
                command.pen_width,
                sender
            );
            return;
        }
        let Some(surface) = self.surfaces.get(draw.surface.0 as usize) else {
            log::warn!("Draw for unknown {:?} from {}", draw.surface, sender);
            return;
        };
        let Some(slot) = self.markers.get_mut(&draw.marker) else {
            log::warn!("Draw for unknown {:?} from {}", draw.marker, sender);
            return;
        };

        let remote = &mut slot.remote;
        if remote.driver != Some(sender) || remote.surface != Some(draw.surface) {
            remote.anchor.reset();
        }
        remote.driver = Some(sender);
        remote.surface = Some(draw.surface);
        let stamps = remote.anchor.replay(surface, &command);

        self.apply_stamps(draw.surface, &stamps);
    }

    fn reset_anchors(&mut self, peer: Uuid) -> usize {
        let mut reset = 0;
        for slot in self.markers.values_mut() {
            if slot.remote.driver == Some(peer) {
                slot.remote.anchor.reset();
                slot.remote.driver = None;
                reset += 1;
            }
        }
        reset
    }

    // ───────────────────────────────────────────────────────────────
    // Internals
    // ───────────────────────────────────────────────────────────────

    /// Shared by local and remote page switches. Ends open strokes, cancels
    /// the local paste and rebinds every marker to the new page.
    fn change_page(&mut self, direction: PageDirection) -> bool {
        if self.pages.target(direction).is_none() {
            return false;
        }
        self.end_strokes();
        self.cancel_paste();

        if self.pages.switch(direction).is_none() {
            return false;
        }
        let active = self.pages.active_surface();
        for slot in self.markers.values_mut() {
            slot.bound = active;
        }
        log::info!("Switched to {}", self.pages.page_label());
        true
    }

    /// Emit a terminator for every open local stroke.
    fn end_strokes(&mut self) {
        for (id, slot) in self.markers.iter_mut() {
            let Some(surface) = slot.session.surface() else {
                continue;
            };
            let pen = slot.pen();
            if let Some(command) = slot.session.release(pen).wire {
                self.outbox.push(BoardMessage::Draw(DrawMessage {
                    marker: *id,
                    surface,
                    command,
                }));
            }
        }
    }

    fn apply_stamps(&mut self, id: SurfaceId, stamps: &[DrawCommand]) {
        if stamps.is_empty() {
            return;
        }
        self.lift_ghost(id);
        let Some(surface) = self.surfaces.get(id.0 as usize) else {
            return;
        };
        for cmd in stamps {
            self.renderer
                .stamp_surface(surface, cmd.x, cmd.y, cmd.pen_width, cmd.color);
            self.history.record(id, *cmd);
        }
    }

    /// Take the ghost off `id` before its pixels change.
    fn lift_ghost(&mut self, id: SurfaceId) {
        if self.ghost_hidden {
            return;
        }
        if let Some(task) = self.paste.as_ref() {
            if task.is_previewing() && task.surface() == id {
                task.hide_ghost(&mut self.renderer, &self.surfaces[id.0 as usize]);
                self.ghost_hidden = true;
            }
        }
    }

    /// Put a lifted ghost back on top of the updated pixels.
    fn settle_ghost(&mut self) {
        if !self.ghost_hidden {
            return;
        }
        self.ghost_hidden = false;
        if let Some(task) = self.paste.as_mut() {
            let surface = &self.surfaces[task.surface().0 as usize];
            task.recapture(&mut self.renderer, surface);
        }
    }

    fn advance_pastes(&mut self) {
        if let Some(mut task) = self.paste.take() {
            let surface = &self.surfaces[task.surface().0 as usize];
            match task.advance(self.loader.as_ref(), &mut self.renderer, surface) {
                PasteProgress::Failed(e) => {
                    log::warn!("Paste of '{}' failed: {}", task.source(), e);
                    self.paste_status = PasteStatus::Failed;
                }
                _ if task.is_done() => {}
                _ => self.paste = Some(task),
            }
        }

        if let Some(task) = self.incoming.front() {
            if task.stage() == PasteStage::Apply {
                let id = task.surface();
                self.lift_ghost(id);
            }
        }
        if let Some(mut task) = self.incoming.pop_front() {
            let surface = &self.surfaces[task.surface().0 as usize];
            if let PasteProgress::Failed(e) =
                task.advance(self.loader.as_ref(), &mut self.renderer, surface)
            {
                log::warn!("Incoming image '{}' not pasted: {}", task.source(), e);
            }
            if !task.is_done() {
                self.incoming.push_front(task);
            }
        }

        self.refresh_paste_status();
    }

    fn refresh_paste_status(&mut self) {
        self.paste_status = match &self.paste {
            Some(task) => task.status(),
            None if !self.incoming.is_empty() => PasteStatus::Incoming,
            None if self.paste_status == PasteStatus::Failed => PasteStatus::Failed,
            None => PasteStatus::Idle,
        };
    }
}
