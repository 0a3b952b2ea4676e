use serde::{Deserialize, Serialize};

/// Prefix shared by every region tag (`IM1`, `IM2`, ...).
pub const TAG_PREFIX: &str = "IM";

/// Upper bound of the normalized coordinate scale.
pub const NORMALIZED_SCALE: u32 = 1000;

/// Axis-aligned box in pixel space. Edges are inclusive and always lie inside
/// the image it was clamped against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub class_id: u32,
}

impl BoundingBox {
    /// Builds a box from floating point pixel coordinates, rounding to the
    /// nearest pixel and clamping into `[0, width-1] x [0, height-1]`.
    ///
    /// Swapped corners are reordered so `x1 <= x2` and `y1 <= y2` always hold.
    pub fn clamped(
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        class_id: u32,
        width: u32,
        height: u32,
    ) -> Self {
        let clamp = |v: f64, dim: u32| -> u32 {
            let max = dim.saturating_sub(1) as f64;
            if v.is_nan() {
                return 0;
            }
            v.round().clamp(0.0, max) as u32
        };

        let (ax, bx) = (clamp(x1, width), clamp(x2, width));
        let (ay, by) = (clamp(y1, height), clamp(y2, height));

        Self {
            x1: ax.min(bx),
            y1: ay.min(by),
            x2: ax.max(bx),
            y2: ay.max(by),
            class_id,
        }
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// A box is degenerate when clamping collapsed it to zero width or height.
    pub fn is_degenerate(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Rescales the box onto the `0..=1000` grid relative to the image size.
    pub fn normalized(&self, width: u32, height: u32) -> NormalizedBbox {
        let scale = |v: u32, dim: u32| -> u32 {
            if dim == 0 {
                return 0;
            }
            let n = (v as f64 * NORMALIZED_SCALE as f64 / dim as f64).round();
            (n as u32).min(NORMALIZED_SCALE)
        };

        NormalizedBbox([
            scale(self.x1, width),
            scale(self.y1, height),
            scale(self.x2, width),
            scale(self.y2, height),
        ])
    }
}

/// Box coordinates `[x1, y1, x2, y2]` on the `0..=1000` grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedBbox(pub [u32; 4]);

/// A box that has been placed in reading order and given a stable tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub tag: String,
    pub rank: usize,
    pub bbox: BoundingBox,
}

impl Region {
    pub fn new(rank: usize, bbox: BoundingBox) -> Self {
        Self {
            tag: tag_for_rank(rank),
            rank,
            bbox,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.bbox.is_degenerate()
    }
}

/// Tags are 1-indexed: rank 0 is `IM1`.
pub fn tag_for_rank(rank: usize) -> String {
    format!("{TAG_PREFIX}{}", rank + 1)
}
