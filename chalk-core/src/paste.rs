//! Image paste: ghost preview, placement and the cooperative load task.
//!
//! ```text
//! local:  CheckSource ─► Decode ─► Upload ─► Preview ─(confirm)─► Done
//! remote: CheckSource ─► Decode ─► Upload ─► Apply ──────────────► Done
//!              │            │         │         │
//!              └────────────┴─────────┴─────────┴──(cancel / failure)─► Done
//! ```
//!
//! One stage runs per tick so the tick loop stays responsive. Cancelling or
//! failing at any stage leaves the surface exactly as it was before the load.

use serde::{Deserialize, Serialize};

use crate::color::Rgba;
use crate::error::LoadError;
use crate::surface::{Surface, SurfaceCapture, SurfaceId, SurfaceRenderer};

/// Aspect ratios within this factor of 1 count as square.
pub const SQUARE_THRESHOLD: f32 = 1.05;
pub const SCALE_UP: f32 = 1.5;
pub const SCALE_DOWN: f32 = 0.75;
/// Largest placement side, in surface widths (or heights).
pub const MAX_PLACEMENT_SIZE: f32 = 4.0;

pub const LOADING_TEXT: &str = "Loading Image...";
pub const INCOMING_TEXT: &str = "Incoming Image...";
pub const PREVIEW_TEXT: &str = "Press ESC to cancel pasting image";
pub const FAILED_TEXT: &str = "Failed to load image. Please try again.";

/// Decoded RGBA pixels, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Rgba>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, pixels: Vec<Rgba>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn solid(width: u32, height: u32, color: Rgba) -> Self {
        Self::new(width, height, vec![color; width as usize * height as usize])
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }

    /// Nearest-neighbour sample at normalised `(u, v)`, clamped to the edges.
    pub fn sample(&self, u: f32, v: f32) -> Rgba {
        if self.width == 0 || self.height == 0 {
            return Rgba::TRANSPARENT;
        }
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(Rgba::TRANSPARENT)
    }
}

/// Clockwise rotation in quarter turns (0..=3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterTurns(pub u8);

impl QuarterTurns {
    pub fn normalized(self) -> QuarterTurns {
        QuarterTurns(self.0 % 4)
    }

    /// Source texture coordinate shown at destination `(u, v)`.
    pub fn source_uv(self, u: f32, v: f32) -> (f32, f32) {
        match self.0 % 4 {
            0 => (u, v),
            1 => (v, 1.0 - u),
            2 => (1.0 - u, 1.0 - v),
            _ => (1.0 - v, u),
        }
    }
}

impl Default for QuarterTurns {
    /// Pasted images are turned once clockwise.
    fn default() -> Self {
        QuarterTurns(1)
    }
}

/// Where an image lands, in normalised surface coordinates. `x`/`y` is the
/// centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: QuarterTurns,
}

impl Placement {
    /// Centred placement sized from the image aspect ratio.
    pub fn for_aspect(aspect: f32) -> Self {
        let (width, height) = if aspect > SQUARE_THRESHOLD {
            (0.5, 0.15 * aspect)
        } else if aspect < 1.0 / SQUARE_THRESHOLD {
            (0.5 * aspect, 0.5)
        } else {
            (0.5, 0.15)
        };
        Self {
            x: 0.5,
            y: 0.5,
            width,
            height,
            rotation: QuarterTurns::default(),
        }
    }

    /// Scale about the centre.
    /// Scale about the centre. Growth stops once the larger side reaches
    /// [`MAX_PLACEMENT_SIZE`]; the aspect ratio is kept. Non-positive or
    /// non-finite factors leave the placement unchanged.
    pub fn scaled(self, factor: f32) -> Self {
        if !(factor.is_finite() && factor > 0.0) {
            return self;
        }
        let largest = self.width.max(self.height);
        let factor = if largest > 0.0 {
            factor.min(MAX_PLACEMENT_SIZE / largest)
        } else {
            factor
        };
        Self {
            width: (self.width * factor).min(MAX_PLACEMENT_SIZE),
            height: (self.height * factor).min(MAX_PLACEMENT_SIZE),
            ..self
        }
    }

    pub fn moved_to(self, x: f32, y: f32) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
            ..self
        }
    }

    /// Checked on receipt: the centre must lie on the surface and each side
    /// in `(0, MAX_PLACEMENT_SIZE]`. NaN fails every comparison.
    pub fn is_valid(&self) -> bool {
        let on_surface = |v: f32| (0.0..=1.0).contains(&v);
        let sized = |v: f32| v > 0.0 && v <= MAX_PLACEMENT_SIZE;
        on_surface(self.x) && on_surface(self.y) && sized(self.width) && sized(self.height)
    }
}

/// Replicated paste: every peer loads `source` itself and composites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePaste {
    pub source: String,
    pub surface: SurfaceId,
    pub placement: Placement,
}

/// Image-decoding boundary.
pub trait ImageLoader {
    fn exists(&self, source: &str) -> bool;
    fn decode(&self, source: &str) -> Result<DecodedImage, LoadError>;
}

/// What the status surface shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasteStatus {
    #[default]
    Idle,
    Loading,
    Incoming,
    Previewing,
    Failed,
}

impl PasteStatus {
    pub fn text(&self) -> &'static str {
        match self {
            PasteStatus::Idle => "",
            PasteStatus::Loading => LOADING_TEXT,
            PasteStatus::Incoming => INCOMING_TEXT,
            PasteStatus::Previewing => PREVIEW_TEXT,
            PasteStatus::Failed => FAILED_TEXT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteStage {
    CheckSource,
    Decode,
    Upload,
    Preview,
    Apply,
    Done,
}

/// Outcome of one [`PasteTask::advance`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum PasteProgress {
    Pending,
    Previewing,
    Applied,
    Failed(LoadError),
}

/// A local paste previews and waits for confirmation; a remote one applies
/// the placement it was sent.
#[derive(Debug, Clone, Copy, PartialEq)]
enum PasteMode {
    Local,
    Remote,
}

/// Cooperative image-load task bound to one surface.
#[derive(Debug)]
pub struct PasteTask {
    source: String,
    surface: SurfaceId,
    mode: PasteMode,
    stage: PasteStage,
    placement: Placement,
    image: Option<DecodedImage>,
    capture: Option<SurfaceCapture>,
    status: PasteStatus,
}

impl PasteTask {
    pub fn local(source: impl Into<String>, surface: SurfaceId) -> Self {
        Self {
            source: source.into(),
            surface,
            mode: PasteMode::Local,
            stage: PasteStage::CheckSource,
            placement: Placement::for_aspect(1.0),
            image: None,
            capture: None,
            status: PasteStatus::Loading,
        }
    }

    pub fn remote(paste: ImagePaste) -> Self {
        Self {
            source: paste.source,
            surface: paste.surface,
            mode: PasteMode::Remote,
            stage: PasteStage::CheckSource,
            placement: paste.placement,
            image: None,
            capture: None,
            status: PasteStatus::Incoming,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn stage(&self) -> PasteStage {
        self.stage
    }

    pub fn status(&self) -> PasteStatus {
        self.status
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn is_previewing(&self) -> bool {
        self.stage == PasteStage::Preview && self.capture.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.stage == PasteStage::Done
    }

    /// Run the next stage.
    pub fn advance<R: SurfaceRenderer + ?Sized>(
        &mut self,
        loader: &dyn ImageLoader,
        renderer: &mut R,
        surface: &Surface,
    ) -> PasteProgress {
        match self.stage {
            PasteStage::CheckSource => {
                if !loader.exists(&self.source) {
                    return self.fail(LoadError::NotFound(self.source.clone()), renderer, surface);
                }
                self.stage = PasteStage::Decode;
                PasteProgress::Pending
            }
            PasteStage::Decode => match loader.decode(&self.source) {
                Ok(image) if image.width == 0 || image.height == 0 => {
                    self.fail(LoadError::Empty(self.source.clone()), renderer, surface)
                }
                Ok(image) => {
                    log::debug!(
                        "Decoded '{}' ({}x{})",
                        self.source,
                        image.width,
                        image.height
                    );
                    if self.mode == PasteMode::Local {
                        self.placement = Placement::for_aspect(image.aspect_ratio());
                    }
                    self.image = Some(image);
                    self.stage = PasteStage::Upload;
                    PasteProgress::Pending
                }
                Err(e) => self.fail(e, renderer, surface),
            },
            PasteStage::Upload => {
                match self.mode {
                    PasteMode::Local => {
                        self.capture = Some(renderer.capture(surface));
                        self.stage = PasteStage::Preview;
                    }
                    PasteMode::Remote => self.stage = PasteStage::Apply,
                }
                PasteProgress::Pending
            }
            PasteStage::Preview => {
                if self.status != PasteStatus::Previewing {
                    self.status = PasteStatus::Previewing;
                    self.show_ghost(renderer, surface);
                }
                PasteProgress::Previewing
            }
            PasteStage::Apply => {
                if let Some(image) = self.image.take() {
                    renderer.composite_image(surface, &image, &self.placement, false);
                }
                log::info!("Pasted '{}' on {:?}", self.source, self.surface);
                self.finish();
                PasteProgress::Applied
            }
            PasteStage::Done => PasteProgress::Pending,
        }
    }

    /// Move the ghost. Only meaningful while previewing.
    pub fn move_to<R: SurfaceRenderer + ?Sized>(
        &mut self,
        x: f32,
        y: f32,
        renderer: &mut R,
        surface: &Surface,
    ) {
        self.placement = self.placement.moved_to(x, y);
        self.show_ghost(renderer, surface);
    }

    pub fn scale<R: SurfaceRenderer + ?Sized>(
        &mut self,
        factor: f32,
        renderer: &mut R,
        surface: &Surface,
    ) {
        self.placement = self.placement.scaled(factor);
        self.show_ghost(renderer, surface);
    }

    /// Commit the previewed image. Returns the message to replicate.
    pub fn confirm<R: SurfaceRenderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        surface: &Surface,
    ) -> Option<ImagePaste> {
        if !self.is_previewing() {
            return None;
        }
        self.hide_ghost(renderer, surface);
        if let Some(image) = self.image.take() {
            renderer.composite_image(surface, &image, &self.placement, false);
        }
        log::info!("Pasted '{}' on {:?}", self.source, self.surface);
        let paste = ImagePaste {
            source: self.source.clone(),
            surface: self.surface,
            placement: self.placement,
        };
        self.finish();
        Some(paste)
    }

    /// Abort at any stage; the surface returns to its pre-load state.
    pub fn cancel<R: SurfaceRenderer + ?Sized>(&mut self, renderer: &mut R, surface: &Surface) {
        if self.is_done() {
            return;
        }
        log::info!("Image loading canceled: '{}'", self.source);
        self.hide_ghost(renderer, surface);
        self.finish();
    }

    /// Put the captured pixels back, removing the ghost.
    pub fn hide_ghost<R: SurfaceRenderer + ?Sized>(&self, renderer: &mut R, surface: &Surface) {
        if let Some(capture) = &self.capture {
            renderer.restore(surface, capture);
        }
    }

    /// Re-capture the surface (it may have been drawn on since), then draw
    /// the ghost on top. The caller must have hidden the ghost first.
    pub fn recapture<R: SurfaceRenderer + ?Sized>(&mut self, renderer: &mut R, surface: &Surface) {
        if self.capture.is_some() {
            self.capture = Some(renderer.capture(surface));
            self.composite_ghost(renderer, surface);
        }
    }

    fn show_ghost<R: SurfaceRenderer + ?Sized>(&self, renderer: &mut R, surface: &Surface) {
        if self.capture.is_none() {
            return;
        }
        self.hide_ghost(renderer, surface);
        self.composite_ghost(renderer, surface);
    }

    fn composite_ghost<R: SurfaceRenderer + ?Sized>(&self, renderer: &mut R, surface: &Surface) {
        if let Some(image) = &self.image {
            renderer.composite_image(surface, image, &self.placement, true);
        }
    }

    fn fail<R: SurfaceRenderer + ?Sized>(
        &mut self,
        error: LoadError,
        renderer: &mut R,
        surface: &Surface,
    ) -> PasteProgress {
        log::error!("Error loading image: {}", error);
        self.hide_ghost(renderer, surface);
        self.finish();
        self.status = PasteStatus::Failed;
        PasteProgress::Failed(error)
    }

    fn finish(&mut self) {
        self.stage = PasteStage::Done;
        self.image = None;
        self.capture = None;
        self.status = PasteStatus::Idle;
    }
}
