//! Built-in 5x7 dot-matrix font, the fallback for stamping region tags when
//! no outline font loads.
//!
//! Only digits and ASCII letters have glyphs (tags are `IM<n>`); anything else
//! renders as a hollow box. At scale 1.0 one dot is [`DOTS_PER_SCALE`] pixels,
//! so a glyph is 21 pixels tall.

pub const GLYPH_WIDTH: u32 = 5;
pub const GLYPH_HEIGHT: u32 = 7;
/// Horizontal advance per character in dots (glyph plus one dot of spacing).
pub const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;
pub const DOTS_PER_SCALE: f32 = 3.0;

type Glyph = [u8; GLYPH_HEIGHT as usize];

const DIGITS: [Glyph; 10] = [
    [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
    [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
    [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
    [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
    [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
    [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
    [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
    [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
];

const LETTERS: [Glyph; 26] = [
    [0x0E, 0x11, 0x11, 0x11, 0x1F, 0x11, 0x11], // A
    [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
    [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
    [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
    [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
    [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
    [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E], // I
    [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
    [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
    [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
    [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11], // M
    [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
    [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
    [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
    [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
    [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
    [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
    [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
    [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
    [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
    [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
];

const MISSING: Glyph = [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F];

fn glyph(c: char) -> &'static Glyph {
    match c {
        '0'..='9' => &DIGITS[c as usize - '0' as usize],
        'A'..='Z' => &LETTERS[c as usize - 'A' as usize],
        'a'..='z' => &LETTERS[c as usize - 'a' as usize],
        _ => &MISSING,
    }
}

fn dot_size(scale: f32) -> f32 {
    scale.max(0.0) * DOTS_PER_SCALE
}

fn width_in_dots(text: &str) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        0
    } else {
        n * GLYPH_ADVANCE - 1
    }
}

/// Pixel size `(width, height)` of `text` at `scale`. Never smaller than 1x1
/// for non-empty text.
pub fn text_size(text: &str, scale: f32) -> (u32, u32) {
    let dots = width_in_dots(text);
    if dots == 0 {
        return (0, 0);
    }
    let dot = dot_size(scale);
    let w = (dots as f32 * dot).ceil().max(1.0) as u32;
    let h = (GLYPH_HEIGHT as f32 * dot).ceil().max(1.0) as u32;
    (w, h)
}

/// Rasterised coverage of `text` at `scale`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMask {
    pub width: u32,
    pub height: u32,
    bits: Vec<bool>,
}

impl TextMask {
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.bits[(y * self.width + x) as usize]
    }

    /// Coordinates of every covered pixel, row-major.
    pub fn covered(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.height).flat_map(move |y| {
            (0..self.width)
                .filter(move |&x| self.is_set(x, y))
                .map(move |x| (x, y))
        })
    }
}

/// Samples each output pixel back into dot space so scales below one pixel per
/// dot still produce a (coarse) legible mask.
pub fn rasterize(text: &str, scale: f32) -> TextMask {
    let (width, height) = text_size(text, scale);
    let glyphs: Vec<&Glyph> = text.chars().map(glyph).collect();
    let dots_w = width_in_dots(text);
    let mut bits = vec![false; (width * height) as usize];

    if width == 0 {
        return TextMask { width, height, bits };
    }

    let sx = dots_w as f32 / width as f32;
    let sy = GLYPH_HEIGHT as f32 / height as f32;
    for y in 0..height {
        let row = ((y as f32 * sy) as u32).min(GLYPH_HEIGHT - 1) as usize;
        for x in 0..width {
            let col = ((x as f32 * sx) as u32).min(dots_w - 1);
            let (ch, within) = ((col / GLYPH_ADVANCE) as usize, col % GLYPH_ADVANCE);
            if within >= GLYPH_WIDTH {
                continue;
            }
            let bit = 0x10 >> within;
            if glyphs[ch][row] & bit != 0 {
                bits[(y * width + x) as usize] = true;
            }
        }
    }

    TextMask { width, height, bits }
}
