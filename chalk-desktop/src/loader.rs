//! Image files in and out: decoding pasted images and saving page notes.

use std::fs;
use std::path::{Path, PathBuf};

use chalk_core::{
    BitmapRenderer, DecodedImage, ImageLoader, LoadError, Rgba, Surface, Whiteboard,
};
use image::{ImageBuffer, RgbaImage};

/// Reads pasted images from the local file system.
#[derive(Debug, Default, Clone)]
pub struct FileImageLoader {
    base: Option<PathBuf>,
}

impl FileImageLoader {
    /// Relative sources resolve against `base`.
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn resolve(&self, source: &str) -> PathBuf {
        match &self.base {
            Some(base) => base.join(source),
            None => PathBuf::from(source),
        }
    }
}

impl ImageLoader for FileImageLoader {
    fn exists(&self, source: &str) -> bool {
        self.resolve(source).is_file()
    }

    fn decode(&self, source: &str) -> Result<DecodedImage, LoadError> {
        let path = self.resolve(source);
        let decoded = image::open(&path).map_err(|e| LoadError::Decode {
            source_path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(LoadError::Empty(path.display().to_string()));
        }
        let pixels = rgba
            .pixels()
            .map(|p| Rgba::rgba(p[0], p[1], p[2], p[3]))
            .collect();
        log::debug!("Decoded {} ({}x{})", path.display(), width, height);
        Ok(DecodedImage::new(width, height, pixels))
    }
}

fn page_image(renderer: &BitmapRenderer, surface: &Surface) -> Option<RgbaImage> {
    let bytes: Vec<u8> = renderer
        .pixels(surface)
        .into_iter()
        .flat_map(|c| [c.r, c.g, c.b, c.a])
        .collect();
    ImageBuffer::from_vec(surface.width(), surface.height(), bytes)
}

/// Write every page as `page_<n>.png` under `dir`. Returns the files written.
pub fn save_notes(
    board: &Whiteboard<BitmapRenderer>,
    dir: &Path,
) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for surface in board.surfaces() {
        let Some(image) = page_image(board.renderer(), surface) else {
            log::warn!("Skipping page {}: buffer size mismatch", surface.id().0 + 1);
            continue;
        };
        let path = dir.join(format!("page_{}.png", surface.id().0 + 1));
        image.save(&path)?;
        written.push(path);
    }
    log::info!("Saved {} page(s) to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalk_core::{InputSnapshot, MarkerId, SurfaceId, WhiteboardConfig};
    use std::time::Instant;
    use tempfile::tempdir;

    fn board(pages: u32) -> Whiteboard<BitmapRenderer> {
        let config = WhiteboardConfig {
            pages,
            surface_width: 32,
            surface_height: 16,
            ..WhiteboardConfig::default()
        };
        let renderer = BitmapRenderer::new(config.background);
        Whiteboard::init(config, renderer)
    }

    #[test]
    fn test_decode_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dot.png");
        let mut img = RgbaImage::new(4, 2);
        img.put_pixel(1, 0, image::Rgba([10, 20, 30, 255]));
        img.save(&path).unwrap();

        let loader = FileImageLoader::with_base(dir.path());
        assert!(loader.exists("dot.png"));
        let decoded = loader.decode("dot.png").unwrap();
        assert_eq!(decoded.aspect_ratio(), 2.0);
    }

    #[test]
    fn test_missing_and_corrupt_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.png"), b"not a png").unwrap();

        let loader = FileImageLoader::with_base(dir.path());
        assert!(!loader.exists("absent.png"));
        assert!(matches!(
            loader.decode("broken.png"),
            Err(LoadError::Decode { .. })
        ));
    }

    #[test]
    fn test_save_notes_writes_each_page() {
        let dir = tempdir().unwrap();
        let mut board = board(2);
        let t = Instant::now();
        board.tick(&InputSnapshot::new().touch(MarkerId(0), SurfaceId(0), 5, 5), t);
        board.tick(&InputSnapshot::new(), t);

        let written = save_notes(&board, &dir.path().join("notes")).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written[1].ends_with("page_2.png"));

        let first = image::open(&written[0]).unwrap().to_rgba8();
        assert_eq!(first.dimensions(), (32, 16));
        assert_eq!(first.get_pixel(5, 5).0, [255, 255, 255, 255]);
        assert_eq!(first.get_pixel(20, 10).0, [0, 0, 0, 255]);
    }
}
