//! Marker and surface colors.

use serde::{Deserialize, Serialize};

/// 8-bit RGBA color.
///
/// Integer channels keep surface comparisons exact across peers; two
/// surfaces that received the same commands compare equal byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);
    pub const TRANSPARENT: Rgba = Rgba { r: 0, g: 0, b: 0, a: 0 };

    /// Opaque color from RGB components.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Blend `over` on top of `self` at 50%, used for ghost previews.
    pub fn half_blend(self, over: Rgba) -> Rgba {
        let mix = |a: u8, b: u8| ((u16::from(a) + u16::from(b)) / 2) as u8;
        Rgba {
            r: mix(self.r, over.r),
            g: mix(self.g, over.g),
            b: mix(self.b, over.b),
            a: self.a.max(over.a),
        }
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Rgba::WHITE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_blend() {
        let out = Rgba::BLACK.half_blend(Rgba::rgb(200, 100, 50));
        assert_eq!(out, Rgba::rgb(100, 50, 25));
    }

    #[test]
    fn test_default_is_white() {
        assert_eq!(Rgba::default(), Rgba::WHITE);
    }
}
