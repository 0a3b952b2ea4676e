use anyhow::Result;
use std::collections::HashMap;
use tagscribe::prelude::*;

fn main() -> Result<()> {
    // A 1000x1000 page with two figures side by side and one below
    let raw_label = "3 0.75 0.2 0.2 0.1\n3 0.25 0.21 0.2 0.1\n14 0.5 0.7 0.4 0.3\n";
    let (width, height) = (1000, 1000);

    let boxes = parse_labels(raw_label, width, height, &[3, 14]);
    let regions = assign_regions(&boxes, &Default::default());

    println!("Regions in reading order:");
    println!("{}", "=".repeat(60));
    for region in &regions {
        let b = region.bbox;
        println!("{:>4}  class {:>2}  ({}, {}) - ({}, {})", region.tag, b.class_id, b.x1, b.y1, b.x2, b.y2);
    }
    println!();

    let response = "<thinking>three figures</thinking>\n\
        <assessmentmarkuplanguage>\
        Left <graphic tag=\"IM1\"/> right <graphic tag=\"IM2\"/> below <graphic tag='im3'/>\
        </assessmentmarkuplanguage>";
    let extracted = extract_response(response, DEFAULT_ANSWER_TAG);
    let document = extracted.document.unwrap_or_else(|| response.to_string());

    let coordinates: HashMap<String, NormalizedBbox> = regions
        .iter()
        .map(|r| (r.tag.clone(), r.bbox.normalized(width, height)))
        .collect();

    println!("Thinking: {}", extracted.thinking);
    println!("Resolved: {}", resolve_to_coordinates(&document, &coordinates));

    Ok(())
}
