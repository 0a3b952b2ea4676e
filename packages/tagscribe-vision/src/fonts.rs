//! Fonts for stamping region tags.
//!
//! An outline font is preferred: an explicit file first, then a few common
//! system locations. When none of them loads, tags fall back to the built-in
//! dot-matrix glyphs in [`crate::glyphs`].
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ab_glyph::{FontVec, InvalidFont, PxScale};
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_text_mut, text_size};
use tracing::{debug, warn};

use crate::glyphs;

/// Pixel height of an outline font at scale 1.0, matching the dot-matrix
/// glyph height.
pub const PX_PER_SCALE: f32 = glyphs::GLYPH_HEIGHT as f32 * glyphs::DOTS_PER_SCALE;

pub const SYSTEM_FONT_PATHS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Clone)]
pub enum LabelFont {
    Outline(Arc<FontVec>),
    DotMatrix,
}

impl fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelFont::Outline(_) => f.write_str("LabelFont::Outline"),
            LabelFont::DotMatrix => f.write_str("LabelFont::DotMatrix"),
        }
    }
}

impl LabelFont {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, InvalidFont> {
        Ok(LabelFont::Outline(Arc::new(FontVec::try_from_vec(data)?)))
    }

    /// Loads `path` if given, otherwise (or when it fails) the first
    /// readable system font, otherwise the dot-matrix glyphs.
    pub fn load(path: Option<&Path>) -> Self {
        if let Some(path) = path {
            match std::fs::read(path) {
                Ok(data) => match Self::from_bytes(data) {
                    Ok(font) => {
                        debug!(path = %path.display(), "loaded label font");
                        return font;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "not a usable font file"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read font file"),
            }
        }
        Self::system()
    }

    pub fn system() -> Self {
        for path in SYSTEM_FONT_PATHS {
            if let Ok(data) = std::fs::read(path) {
                if let Ok(font) = Self::from_bytes(data) {
                    debug!(path, "loaded system label font");
                    return font;
                }
            }
        }
        debug!("no system font found; using dot-matrix glyphs");
        LabelFont::DotMatrix
    }

    pub fn is_outline(&self) -> bool {
        matches!(self, LabelFont::Outline(_))
    }

    pub fn text_size(&self, text: &str, scale: f32) -> (u32, u32) {
        match self {
            LabelFont::Outline(font) => {
                if text.is_empty() {
                    return (0, 0);
                }
                let (w, h) = text_size(px_scale(scale), font.as_ref(), text);
                (w.max(1), h.max(1))
            }
            LabelFont::DotMatrix => glyphs::text_size(text, scale),
        }
    }

    /// Coverage mask of `text` at `scale`, sized to [`LabelFont::text_size`].
    /// 255 is full ink.
    pub fn rasterize(&self, text: &str, scale: f32) -> GrayImage {
        match self {
            LabelFont::Outline(font) => {
                let (w, h) = self.text_size(text, scale);
                let mut mask = GrayImage::new(w, h);
                draw_text_mut(&mut mask, Luma([255]), 0, 0, px_scale(scale), font.as_ref(), text);
                mask
            }
            LabelFont::DotMatrix => {
                let dots = glyphs::rasterize(text, scale);
                let mut mask = GrayImage::new(dots.width, dots.height);
                for (x, y) in dots.covered() {
                    mask.put_pixel(x, y, Luma([255]));
                }
                mask
            }
        }
    }
}

impl Default for LabelFont {
    fn default() -> Self {
        Self::system()
    }
}

fn px_scale(scale: f32) -> PxScale {
    PxScale::from((scale * PX_PER_SCALE).max(1.0))
}
