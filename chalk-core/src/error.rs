use thiserror::Error;

use crate::marker::MarkerId;
use crate::surface::SurfaceId;

/// Reading or writing the whiteboard configuration failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// An image could not be loaded for pasting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("Image file not found: {0}")]
    NotFound(String),
    #[error("Failed to decode '{source_path}': {reason}")]
    Decode { source_path: String, reason: String },
    #[error("Image '{0}' has no pixels")]
    Empty(String),
}

/// A programming defect in the caller, not a runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{marker:?} is stroking on {active:?} but was sampled on {requested:?}")]
    ConcurrentStroke {
        marker: MarkerId,
        active: SurfaceId,
        requested: SurfaceId,
    },
    #[error("Unknown marker {0:?}")]
    UnknownMarker(MarkerId),
    #[error("Surface {0:?} does not exist")]
    UnknownSurface(SurfaceId),
}

impl InvariantViolation {
    /// Log loudly; development builds stop right here.
    pub fn report(&self) {
        log::error!("Invariant violation: {}", self);
        if cfg!(debug_assertions) {
            panic!("invariant violation: {self}");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown page direction '{0}', expected 'left' or 'right'")]
pub struct ParseDirectionError(pub String);
