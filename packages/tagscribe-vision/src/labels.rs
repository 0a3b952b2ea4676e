//! Parsing of detection labels: one `<class> <xc> <yc> <w> <h>` line per box,
//! geometry normalized to `[0, 1]` of the image size.
use thiserror::Error;
use tracing::warn;

use crate::region::BoundingBox;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LabelError {
    #[error("line {line}: expected 5 fields, found {found}")]
    FieldCount { line: usize, found: usize },
    #[error("line {line}: invalid class id {value:?}")]
    ClassId { line: usize, value: String },
    #[error("line {line}: invalid coordinate {value:?}")]
    Coordinate { line: usize, value: String },
}

/// Parses every label line, failing on the first malformed one.
///
/// `classes` restricts the result to the given class ids; an empty slice
/// keeps every class.
pub fn try_parse_labels(
    raw: &str,
    width: u32,
    height: u32,
    classes: &[u32],
) -> Result<Vec<BoundingBox>, LabelError> {
    let mut boxes = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if let Some(b) = parse_line(idx + 1, line, width, height, classes)? {
            boxes.push(b);
        }
    }
    Ok(boxes)
}

/// Lenient variant of [`try_parse_labels`]: malformed lines are logged and
/// skipped. Empty or whitespace-only input yields no boxes.
pub fn parse_labels(raw: &str, width: u32, height: u32, classes: &[u32]) -> Vec<BoundingBox> {
    raw.lines()
        .enumerate()
        .filter_map(|(idx, line)| match parse_line(idx + 1, line, width, height, classes) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "skipping malformed label line");
                None
            }
        })
        .collect()
}

fn parse_line(
    line_no: usize,
    line: &str,
    width: u32,
    height: u32,
    classes: &[u32],
) -> Result<Option<BoundingBox>, LabelError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(None);
    }
    if parts.len() != 5 {
        return Err(LabelError::FieldCount {
            line: line_no,
            found: parts.len(),
        });
    }

    let class_id: u32 = parts[0].parse().map_err(|_| LabelError::ClassId {
        line: line_no,
        value: parts[0].to_string(),
    })?;
    if !classes.is_empty() && !classes.contains(&class_id) {
        return Ok(None);
    }

    let mut coords = [0f64; 4];
    for (slot, value) in coords.iter_mut().zip(&parts[1..]) {
        *slot = value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| LabelError::Coordinate {
                line: line_no,
                value: value.to_string(),
            })?;
    }

    let [xc, yc, w, h] = coords;
    let (fw, fh) = (width as f64, height as f64);
    Ok(Some(BoundingBox::clamped(
        (xc - w / 2.0) * fw,
        (yc - h / 2.0) * fh,
        (xc + w / 2.0) * fw,
        (yc + h / 2.0) * fh,
        class_id,
        width,
        height,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_box_to_pixels() {
        let boxes = parse_labels("3 0.5 0.5 0.2 0.2", 1000, 1000, &[]);
        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        assert_eq!((b.x1, b.y1, b.x2, b.y2, b.class_id), (400, 400, 600, 600, 3));
    }

    #[test]
    fn test_blank_labels_yield_no_boxes() {
        assert!(parse_labels("", 100, 100, &[]).is_empty());
        assert!(parse_labels("  \n\t\n", 100, 100, &[]).is_empty());
    }

    #[test]
    fn test_class_filter() {
        let raw = "3 0.5 0.5 0.2 0.2\n1 0.1 0.1 0.1 0.1\n14 0.8 0.8 0.1 0.1";
        let boxes = parse_labels(raw, 100, 100, &[3, 14]);
        let classes: Vec<u32> = boxes.iter().map(|b| b.class_id).collect();
        assert_eq!(classes, vec![3, 14]);
    }

    #[test]
    fn test_malformed_lines() {
        let raw = "3 0.5 0.5 0.2\n3 0.5 0.5 0.2 0.2";
        assert_eq!(
            try_parse_labels(raw, 100, 100, &[]),
            Err(LabelError::FieldCount { line: 1, found: 4 })
        );
        assert_eq!(parse_labels(raw, 100, 100, &[]).len(), 1);

        assert!(matches!(
            try_parse_labels("x 0.5 0.5 0.2 0.2", 100, 100, &[]),
            Err(LabelError::ClassId { line: 1, .. })
        ));
        assert!(matches!(
            try_parse_labels("3 0.5 nan 0.2 0.2", 100, 100, &[]),
            Err(LabelError::Coordinate { line: 1, .. })
        ));
    }
}
