//! Draws tagged, semi-transparent region overlays and cuts region crops.
use std::path::PathBuf;

use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::debug;

use crate::fonts::LabelFont;
use crate::region::Region;

/// Outline colours, cycled by region rank.
pub const PALETTE: [Rgb<u8>; 6] = [
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([255, 0, 0]),
    Rgb([255, 255, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 255]),
];

const INITIAL_SCALE: f32 = 1.0;
const SCALE_STEP: f32 = 0.5;
const MIN_SCALE_STEP: f32 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Outline thickness for a 1000px image; scaled by `min(W, H) / 1000`.
    pub base_thickness: u32,
    pub fill_color: Rgb<u8>,
    pub text_color: Rgb<u8>,
    pub fill_opacity: f32,
    pub text_opacity: f32,
    pub draw_labels: bool,
    /// Clearance kept between the tag text and the box edge.
    pub padding: u32,
    /// Outline font for tags. System fonts, then the dot-matrix glyphs, are
    /// used when unset or unreadable.
    pub font_path: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            base_thickness: 2,
            fill_color: Rgb([0, 255, 0]),
            text_color: Rgb([255, 0, 0]),
            fill_opacity: 0.4,
            text_opacity: 0.75,
            draw_labels: true,
            padding: 2,
            font_path: None,
        }
    }
}

/// Where and how large a tag label was drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPlacement {
    pub tag: String,
    pub x: i64,
    pub y: i64,
    pub scale: f32,
    /// The text did not fit the box even at the smallest scale.
    pub overflow: bool,
}

#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub image: RgbImage,
    pub labels: Vec<LabelPlacement>,
}

/// Unannotated pixels of one region, copied out of the source image.
#[derive(Debug, Clone)]
pub struct CroppedRegion {
    pub tag: String,
    pub image: RgbImage,
}

/// Result of fitting a label into a box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontFit {
    pub scale: f32,
    pub overflow: bool,
}

/// Largest scale at which `text` plus `padding` on each side fits in
/// `max_width x max_height`. Coarse doubling/halving first, then refinement
/// with a halving step. When nothing fits, the smallest scale tried is
/// returned with `overflow` set.
pub fn fit_font_scale(font: &LabelFont, text: &str, max_width: u32, max_height: u32, padding: u32) -> FontFit {
    let fits = |s: f32| -> bool {
        let (w, h) = font.text_size(text, s);
        let pad = 2 * u64::from(padding);
        u64::from(w) + pad <= u64::from(max_width) && u64::from(h) + pad <= u64::from(max_height)
    };

    if text.is_empty() {
        return FontFit {
            scale: INITIAL_SCALE,
            overflow: false,
        };
    }

    let mut scale = INITIAL_SCALE;
    if !fits(scale) {
        while scale > MIN_SCALE_STEP && !fits(scale) {
            scale /= 2.0;
        }
    } else {
        while fits(scale + SCALE_STEP) {
            scale += SCALE_STEP;
        }
    }

    let mut step = SCALE_STEP;
    while step >= MIN_SCALE_STEP {
        if fits(scale + step) {
            scale += step;
        } else {
            step /= 2.0;
        }
    }

    FontFit {
        scale,
        overflow: !fits(scale),
    }
}

/// Clamps into `[lo, hi]`, preferring `hi` when the bounds cross.
fn clip(v: i64, lo: i64, hi: i64) -> i64 {
    v.max(lo).min(hi)
}

fn blend(dst: &mut Rgb<u8>, src: Rgb<u8>, alpha: f32) {
    for (d, s) in dst.0.iter_mut().zip(src.0) {
        let v = s as f32 * alpha + *d as f32 * (1.0 - alpha);
        *d = v.round().clamp(0.0, 255.0) as u8;
    }
}

#[derive(Debug)]
pub struct RegionRenderer {
    options: RenderOptions,
    font: LabelFont,
}

impl RegionRenderer {
    /// Loads the label font named by `options.font_path`, falling back as
    /// described on [`LabelFont::load`].
    pub fn new(options: RenderOptions) -> Self {
        let font = LabelFont::load(options.font_path.as_deref());
        Self::with_font(options, font)
    }

    pub fn with_font(options: RenderOptions, font: LabelFont) -> Self {
        Self { options, font }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn font(&self) -> &LabelFont {
        &self.font
    }

    /// Never thinner than 1px nor thicker than the shorter image side.
    pub fn box_thickness(&self, width: u32, height: u32) -> u32 {
        let side = width.min(height);
        let scaled = u64::from(self.options.base_thickness) * u64::from(side) / 1000;
        u32::try_from(scaled).unwrap_or(u32::MAX).min(side).max(1)
    }

    /// Draws every region onto a fresh copy of `image` and cuts crops from the
    /// untouched original. `image` itself is never modified.
    pub fn render(&self, image: &RgbImage, regions: &[Region]) -> (RenderedImage, Vec<CroppedRegion>) {
        debug!(regions = regions.len(), "rendering regions");
        let mut labels = Vec::with_capacity(regions.len());
        let annotated = regions.iter().fold(image.clone(), |canvas, region| {
            let (next, label) = self.overlay_region(canvas, region);
            labels.extend(label);
            next
        });

        (
            RenderedImage {
                image: annotated,
                labels,
            },
            crop_regions(image, regions),
        )
    }

    /// Composites one region onto `canvas`: outline, translucent fill, then
    /// translucent tag text.
    pub fn overlay_region(&self, mut canvas: RgbImage, region: &Region) -> (RgbImage, Option<LabelPlacement>) {
        let (iw, ih) = canvas.dimensions();
        if iw == 0 || ih == 0 {
            return (canvas, None);
        }
        let b = region.bbox;
        let color = PALETTE[region.rank % PALETTE.len()];

        let thickness = self.box_thickness(iw, ih) as i64;
        for i in 0..thickness {
            let d = i - thickness / 2;
            let w = b.width() as i64 + 1 - 2 * d;
            let h = b.height() as i64 + 1 - 2 * d;
            if w <= 0 || h <= 0 {
                continue;
            }
            let rect = Rect::at((b.x1 as i64 + d) as i32, (b.y1 as i64 + d) as i32).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        if !self.options.draw_labels {
            return (canvas, None);
        }

        for y in b.y1..=b.y2 {
            for x in b.x1..=b.x2 {
                blend(canvas.get_pixel_mut(x, y), self.options.fill_color, self.options.fill_opacity);
            }
        }

        let pad = self.options.padding;
        let fit = fit_font_scale(&self.font, &region.tag, b.width(), b.height(), pad);
        if fit.overflow {
            debug!(tag = %region.tag, "label does not fit its box; using smallest scale");
        }

        let mask = self.font.rasterize(&region.tag, fit.scale);
        let (tw, th) = (mask.width() as i64, mask.height() as i64);
        let (x1, y1, x2, y2) = (b.x1 as i64, b.y1 as i64, b.x2 as i64, b.y2 as i64);
        let pad = pad as i64;
        let tx = clip(x1 + (x2 - x1 - tw) / 2, x1 + pad, x2 - tw - pad);
        let ty = clip(y1 + (y2 - y1 - th) / 2, y1 + pad, y2 - th - pad);

        for (mx, my, ink) in mask.enumerate_pixels() {
            let coverage = ink.0[0];
            let (px, py) = (tx + mx as i64, ty + my as i64);
            if coverage == 0 || px < 0 || py < 0 || px >= iw as i64 || py >= ih as i64 {
                continue;
            }
            blend(
                canvas.get_pixel_mut(px as u32, py as u32),
                self.options.text_color,
                self.options.text_opacity * f32::from(coverage) / 255.0,
            );
        }

        let label = LabelPlacement {
            tag: region.tag.clone(),
            x: tx,
            y: ty,
            scale: fit.scale,
            overflow: fit.overflow,
        };
        (canvas, Some(label))
    }
}

impl Default for RegionRenderer {
    fn default() -> Self {
        Self::new(RenderOptions::default())
    }
}

/// Copies each non-degenerate region out of `image`, in region order.
pub fn crop_regions(image: &RgbImage, regions: &[Region]) -> Vec<CroppedRegion> {
    regions
        .iter()
        .filter(|r| !r.is_degenerate())
        .map(|r| {
            let b = r.bbox;
            CroppedRegion {
                tag: r.tag.clone(),
                image: imageops::crop_imm(image, b.x1, b.y1, b.width(), b.height()).to_image(),
            }
        })
        .collect()
}
