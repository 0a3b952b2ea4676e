//! Reading-order layout: groups boxes into row bands and assigns `IM<n>` tags.
//!
//! Boxes are visited top edge first. A box joins the first existing band whose
//! vertical extent it overlaps within `row_threshold`, widening that band;
//! otherwise it opens a new band. Bands are never merged afterwards, even when
//! a later box would bridge two of them. Bands are then ordered by their top
//! and members by their left edge.
use crate::region::{BoundingBox, Region};

pub const DEFAULT_ROW_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutConfig {
    /// Vertical slack in pixels when testing whether a box belongs to a band.
    pub row_threshold: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            row_threshold: DEFAULT_ROW_THRESHOLD,
        }
    }
}

/// A horizontal band of boxes that read as one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBand {
    pub y_min: u32,
    pub y_max: u32,
    /// Indices into the input box slice.
    pub members: Vec<usize>,
}

impl RowBand {
    fn accepts(&self, b: &BoundingBox, threshold: u32) -> bool {
        let t = threshold as i64;
        (b.y1 as i64) <= self.y_max as i64 + t && (b.y2 as i64) >= self.y_min as i64 - t
    }
}

/// Groups boxes into row bands, ordered top to bottom with members left to right.
pub fn group_into_rows(boxes: &[BoundingBox], row_threshold: u32) -> Vec<RowBand> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    // Stable sorts keep input order on ties, so the result is deterministic.
    order.sort_by_key(|&i| boxes[i].y1);

    let mut bands: Vec<RowBand> = Vec::new();
    for i in order {
        let b = &boxes[i];
        match bands.iter_mut().find(|band| band.accepts(b, row_threshold)) {
            Some(band) => {
                band.y_min = band.y_min.min(b.y1);
                band.y_max = band.y_max.max(b.y2);
                band.members.push(i);
            }
            None => bands.push(RowBand {
                y_min: b.y1,
                y_max: b.y2,
                members: vec![i],
            }),
        }
    }

    bands.sort_by_key(|band| band.y_min);
    for band in &mut bands {
        band.members.sort_by_key(|&i| boxes[i].x1);
    }
    bands
}

/// Indices of `boxes` in reading order.
pub fn reading_order(boxes: &[BoundingBox], row_threshold: u32) -> Vec<usize> {
    group_into_rows(boxes, row_threshold)
        .into_iter()
        .flat_map(|band| band.members)
        .collect()
}

/// Orders boxes and tags them `IM1..IMn`. Degenerate boxes keep their tag.
pub fn assign_regions(boxes: &[BoundingBox], config: &LayoutConfig) -> Vec<Region> {
    reading_order(boxes, config.row_threshold)
        .into_iter()
        .enumerate()
        .map(|(rank, i)| Region::new(rank, boxes[i]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(x1: u32, y1: u32, x2: u32, y2: u32) -> BoundingBox {
        BoundingBox {
            x1,
            y1,
            x2,
            y2,
            class_id: 0,
        }
    }

    fn tags_for(boxes: &[BoundingBox]) -> Vec<(String, u32, u32)> {
        assign_regions(boxes, &LayoutConfig::default())
            .into_iter()
            .map(|r| (r.tag, r.bbox.x1, r.bbox.y1))
            .collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(assign_regions(&[], &LayoutConfig::default()).is_empty());
        assert!(group_into_rows(&[], 10).is_empty());
    }

    #[test]
    fn test_rows_then_columns() {
        // Second row first in input; the right box in row one sits slightly lower.
        let boxes = vec![
            bx(10, 200, 90, 260),
            bx(300, 14, 380, 60),
            bx(10, 10, 90, 50),
            bx(200, 205, 260, 250),
        ];
        assert_eq!(
            tags_for(&boxes),
            vec![
                ("IM1".to_string(), 10, 10),
                ("IM2".to_string(), 300, 14),
                ("IM3".to_string(), 10, 200),
                ("IM4".to_string(), 200, 205),
            ]
        );
    }

    #[test]
    fn test_threshold_boundary() {
        // Gap of exactly the threshold still joins; one more pixel splits.
        let joined = group_into_rows(&[bx(0, 0, 10, 20), bx(20, 30, 30, 40)], 10);
        assert_eq!(joined.len(), 1);

        let split = group_into_rows(&[bx(0, 0, 10, 20), bx(20, 31, 30, 40)], 10);
        assert_eq!(split.len(), 2);
    }

    #[test]
    fn test_band_extent_widens_on_join() {
        // The tall box stretches the first band so the low box still joins it.
        let a = bx(0, 0, 10, 10);
        let tall = bx(50, 12, 60, 80);
        let low = bx(100, 70, 110, 90);
        let far = bx(0, 101, 10, 120);
        let bands = group_into_rows(&[low, far, tall, a], 5);
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[0].members, vec![3, 2, 0]);
        assert_eq!((bands[0].y_min, bands[0].y_max), (0, 90));
        assert_eq!(bands[1].members, vec![1]);
    }

    #[test]
    fn test_deterministic_assignment() {
        let boxes: Vec<BoundingBox> = (0..40)
            .map(|i| bx((i * 37) % 500, (i * 53) % 700, (i * 37) % 500 + 20, (i * 53) % 700 + 15))
            .collect();
        let first = tags_for(&boxes);
        for _ in 0..5 {
            assert_eq!(tags_for(&boxes), first);
        }
    }

    #[test]
    fn test_degenerate_box_keeps_tag() {
        let regions = assign_regions(&[bx(5, 5, 5, 40), bx(50, 5, 90, 40)], &LayoutConfig::default());
        assert_eq!(regions[0].tag, "IM1");
        assert!(regions[0].is_degenerate());
        assert_eq!(regions[1].tag, "IM2");
    }
}
