//! Whiteboard configuration, read once at startup.
//!
//! Stored as JSON. Missing fields take their defaults, so the minimal file
//! `{"pages": 1}` written on first run is a complete configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::color::Rgba;
use crate::error::ConfigError;
use crate::marker::{MarkerId, PEN_SIZE_INTERVAL};

pub const DEFAULT_SURFACE_SIZE: u32 = 2048;

/// Content written when no config file exists.
const DEFAULT_CONTENT: &str = "{\"pages\": 1}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerConfig {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub eraser: bool,
}

impl MarkerConfig {
    pub fn marker_id(&self) -> MarkerId {
        MarkerId(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhiteboardConfig {
    /// Number of pages; values below 1 are treated as 1.
    pub pages: u32,
    /// Snapshot the pages when the session ends.
    pub save_notes: bool,
    pub surface_width: u32,
    pub surface_height: u32,
    pub background: Rgba,
    pub markers: Vec<MarkerConfig>,
    pub pen_size_interval_ms: u64,
}

impl Default for WhiteboardConfig {
    fn default() -> Self {
        Self {
            pages: 1,
            save_notes: false,
            surface_width: DEFAULT_SURFACE_SIZE,
            surface_height: DEFAULT_SURFACE_SIZE,
            background: Rgba::BLACK,
            markers: vec![
                MarkerConfig {
                    id: 0,
                    name: "marker".into(),
                    eraser: false,
                },
                MarkerConfig {
                    id: 1,
                    name: "eraser".into(),
                    eraser: true,
                },
            ],
            pen_size_interval_ms: PEN_SIZE_INTERVAL.as_millis() as u64,
        }
    }
}

impl WhiteboardConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut config: WhiteboardConfig = serde_json::from_str(text)?;
        config.pages = config.pages.max(1);
        config.surface_width = config.surface_width.max(1);
        config.surface_height = config.surface_height.max(1);
        Ok(config)
    }

    /// Read `path`, creating it with default content first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, DEFAULT_CONTENT)?;
            log::info!("Created default config at {}", path.display());
        }
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        log::info!(
            "Loaded config: {} page(s), {} marker(s), save_notes={}",
            config.pages,
            config.markers.len(),
            config.save_notes
        );
        Ok(config)
    }

    pub fn pen_size_interval(&self) -> Duration {
        Duration::from_millis(self.pen_size_interval_ms)
    }
}
