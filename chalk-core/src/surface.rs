//! Drawable surfaces and the rendering boundary.
//!
//! The core never touches pixels directly. Every mutation goes through a
//! [`SurfaceRenderer`], which may be a GPU texture, a framebuffer or the
//! CPU [`BitmapRenderer`] used by headless peers and tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::color::Rgba;
use crate::paste::{DecodedImage, Placement};

/// Identifies a surface. Surfaces are pages, so this is the page index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub u32);

/// A fixed-size drawable canvas.
///
/// Dimensions are fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    id: SurfaceId,
    width: u32,
    height: u32,
}

impl Surface {
    pub fn new(id: SurfaceId, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bounds policy: `0 <= x < width` and `0 <= y < height`.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }
}

/// Opaque copy of a surface's pixels, taken before a ghost preview.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceCapture {
    pub surface: SurfaceId,
    pub pixels: Vec<Rgba>,
}

/// Rendering boundary: the commands the core issues against surfaces.
pub trait SurfaceRenderer {
    /// Over-paint a `pen_width` square centred on `(x, y)`.
    fn stamp_surface(&mut self, surface: &Surface, x: i32, y: i32, pen_width: u32, color: Rgba);

    /// Reset every pixel to the background.
    fn clear_surface(&mut self, surface: &Surface);

    fn capture(&self, surface: &Surface) -> SurfaceCapture;

    fn restore(&mut self, surface: &Surface, capture: &SurfaceCapture);

    /// Draw `image` into `placement`. Ghost composites are half-transparent.
    fn composite_image(
        &mut self,
        surface: &Surface,
        image: &DecodedImage,
        placement: &Placement,
        ghost: bool,
    );
}

/// CPU renderer keeping one RGBA buffer per surface.
pub struct BitmapRenderer {
    background: Rgba,
    buffers: HashMap<SurfaceId, Vec<Rgba>>,
}

impl BitmapRenderer {
    pub fn new(background: Rgba) -> Self {
        Self {
            background,
            buffers: HashMap::new(),
        }
    }

    pub fn background(&self) -> Rgba {
        self.background
    }

    /// Pixel at `(x, y)`, `None` outside the surface.
    pub fn pixel(&self, surface: &Surface, x: i32, y: i32) -> Option<Rgba> {
        if !surface.contains(x, y) {
            return None;
        }
        let idx = y as usize * surface.width() as usize + x as usize;
        Some(
            self.buffers
                .get(&surface.id())
                .map_or(self.background, |buf| buf[idx]),
        )
    }

    /// Raw pixels of a surface (background-filled if never touched).
    pub fn pixels(&self, surface: &Surface) -> Vec<Rgba> {
        self.buffers
            .get(&surface.id())
            .cloned()
            .unwrap_or_else(|| vec![self.background; pixel_count(surface)])
    }

    /// FNV-1a over the surface pixels. Cheap convergence check between peers.
    pub fn checksum(&self, surface: &Surface) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for px in self.pixels(surface) {
            for byte in [px.r, px.g, px.b, px.a] {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
        }
        hash
    }

    fn buffer_mut(&mut self, surface: &Surface) -> &mut Vec<Rgba> {
        let background = self.background;
        self.buffers
            .entry(surface.id())
            .or_insert_with(|| vec![background; pixel_count(surface)])
    }
}

fn pixel_count(surface: &Surface) -> usize {
    surface.width() as usize * surface.height() as usize
}

impl SurfaceRenderer for BitmapRenderer {
    fn stamp_surface(&mut self, surface: &Surface, x: i32, y: i32, pen_width: u32, color: Rgba) {
        let side = pen_width.max(1) as i32;
        let left = x - side / 2;
        let top = y - side / 2;

        let x0 = left.max(0);
        let y0 = top.max(0);
        let x1 = (left + side).min(surface.width() as i32);
        let y1 = (top + side).min(surface.height() as i32);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let stride = surface.width() as usize;
        let buf = self.buffer_mut(surface);
        for py in y0..y1 {
            let row = py as usize * stride;
            buf[row + x0 as usize..row + x1 as usize].fill(color);
        }
    }

    fn clear_surface(&mut self, surface: &Surface) {
        let background = self.background;
        self.buffers
            .insert(surface.id(), vec![background; pixel_count(surface)]);
    }

    fn capture(&self, surface: &Surface) -> SurfaceCapture {
        SurfaceCapture {
            surface: surface.id(),
            pixels: self.pixels(surface),
        }
    }

    fn restore(&mut self, surface: &Surface, capture: &SurfaceCapture) {
        if capture.surface != surface.id() || capture.pixels.len() != pixel_count(surface) {
            log::warn!(
                "Ignoring capture of {:?} restored onto {:?}",
                capture.surface,
                surface.id()
            );
            return;
        }
        self.buffers.insert(surface.id(), capture.pixels.clone());
    }

    fn composite_image(
        &mut self,
        surface: &Surface,
        image: &DecodedImage,
        placement: &Placement,
        ghost: bool,
    ) {
        if image.width == 0 || image.height == 0 {
            return;
        }

        let sw = surface.width() as f32;
        let sh = surface.height() as f32;
        // Float-to-int casts saturate, so everything below stays in i64 range.
        let w = (placement.width * sw).round() as i64;
        let h = (placement.height * sh).round() as i64;
        if w <= 0 || h <= 0 {
            return;
        }
        let left = ((placement.x * sw).round() as i64).saturating_sub(w / 2);
        let top = ((placement.y * sh).round() as i64).saturating_sub(h / 2);

        // Only the part of the rectangle that lies on the surface is visited.
        let width = i64::from(surface.width());
        let height = i64::from(surface.height());
        let (dx_start, dx_end) = (left.saturating_neg().max(0), width.saturating_sub(left).min(w));
        let (dy_start, dy_end) = (top.saturating_neg().max(0), height.saturating_sub(top).min(h));
        if dx_start >= dx_end || dy_start >= dy_end {
            return;
        }

        let stride = surface.width() as usize;
        let buf = self.buffer_mut(surface);
        for dy in dy_start..dy_end {
            let py = (top + dy) as usize;
            let v = (dy as f32 + 0.5) / h as f32;
            for dx in dx_start..dx_end {
                let px = (left + dx) as usize;
                let u = (dx as f32 + 0.5) / w as f32;
                let (su, sv) = placement.rotation.source_uv(u, v);
                let src = image.sample(su, sv);
                if src.a == 0 {
                    continue;
                }
                let dst = &mut buf[py * stride + px];
                *dst = if ghost { dst.half_blend(src) } else { src };
            }
        }
    }
}
