pub mod engine;
pub mod fonts;
pub mod glyphs;
pub mod labels;
pub mod layout;
pub mod region;
pub mod render;

pub use engine::{EncodedImage, GenerationConfig, ModelError, ModelRequest, VisionModel};
pub use fonts::LabelFont;
pub use labels::{parse_labels, try_parse_labels, LabelError};
pub use layout::{assign_regions, group_into_rows, reading_order, LayoutConfig, RowBand, DEFAULT_ROW_THRESHOLD};
pub use region::{tag_for_rank, BoundingBox, NormalizedBbox, Region};
pub use render::{crop_regions, fit_font_scale, CroppedRegion, LabelPlacement, RegionRenderer, RenderOptions, RenderedImage};
