//! # chalk-core — Replicated whiteboard state
//!
//! Engine-free domain logic for a shared whiteboard: strokes, marker colour
//! and pen width, page selection and image paste, plus the message union
//! every peer exchanges.
//!
//! ## Architecture
//!
//! ```text
//!   InputSnapshot ──► Whiteboard::tick ──► StrokeSession ──┬──► SurfaceRenderer
//!                          │                               └──► DrawnDataIndex
//!                          ▼
//!                   take_outbound() ──► (transport) ──► apply_remote() on peers
//! ```
//!
//! ## Modules
//!
//! - [`stroke`] — stroke state machine, interpolation, receiver-side replay
//! - [`history`] — per-surface draw log used for clearing
//! - [`marker`] — colour and pen width with last-writer-wins replication
//! - [`page`] — page selection
//! - [`paste`] — ghost preview and cooperative image loading
//! - [`board`] — the aggregate driven by the tick loop
//! - [`surface`] — surfaces and the rendering boundary

pub mod board;
pub mod color;
pub mod config;
pub mod error;
pub mod history;
pub mod marker;
pub mod page;
pub mod paste;
pub mod stroke;
pub mod surface;

pub use board::{BoardMessage, DrawMessage, Whiteboard};
pub use color::Rgba;
pub use config::{MarkerConfig, WhiteboardConfig};
pub use error::{ConfigError, InvariantViolation, LoadError, ParseDirectionError};
pub use history::{DrawCommandLog, DrawnDataIndex, HistoryStats};
pub use marker::{ColorState, ColorUpdate, MarkerId, PenSizeState, PenSizeUpdate};
pub use page::{PageChange, PageDirection, PageSelector};
pub use paste::{
    DecodedImage, ImageLoader, ImagePaste, PasteStatus, PasteTask, Placement, QuarterTurns,
};
pub use stroke::{
    interpolate, DrawCommand, InputSample, InputSnapshot, Pen, Point, ReplayAnchor, StrokeSession,
    StrokeStep,
};
pub use surface::{BitmapRenderer, Surface, SurfaceCapture, SurfaceId, SurfaceRenderer};
